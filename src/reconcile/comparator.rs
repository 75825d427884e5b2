//! Zip–directory comparison by content key.
//!
//! [`compare`] is the pure core: given archive entries with their keys and
//! an index of a directory, it splits both sides into duplicates and
//! uniques. [`ZipDirectoryComparator`] wires it to the filesystem: it keys a
//! directory (through the cache when one is attached), keys the entries of
//! one zip under the same strategy and compares them.
//!
//! Keys are only ever compared within one strategy.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::destination::{DestinationScanner, DestinationSnapshot, DEFAULT_MTIME_TOLERANCE_SECS};
use super::ReconcileError;
use crate::cache::FingerprintCache;
use crate::error::ErrorSummary;
use crate::progress::{Phase, ProgressReporter};
use crate::scanner::{
    build_index, list_entries, ArchiveEntry, ArchiveError, ArchiveReader, ContentKey,
    DirectoryEntry, DirectoryIndex, DirectoryScanner, Fingerprinter, ScanError,
};

/// Outcome of comparing archive entries against a directory.
#[derive(Debug, Clone, Default)]
pub struct Comparison {
    /// Archive entries whose content exists in the directory, paired with
    /// the first matching directory file
    pub duplicates: Vec<(ArchiveEntry, DirectoryEntry)>,
    /// Archive entries with no match in the directory
    pub unique_in_archive: Vec<ArchiveEntry>,
    /// Directory files whose key no archive entry has
    pub unique_in_directory: Vec<DirectoryEntry>,
    /// Entries whose key could not be computed (treated as unique)
    pub errors: ErrorSummary,
    /// Whether a shutdown request cut the comparison short
    pub interrupted: bool,
}

impl Comparison {
    /// Number of archive entries compared.
    #[must_use]
    pub fn archive_total(&self) -> usize {
        self.duplicates.len() + self.unique_in_archive.len()
    }

    /// Bytes of archive entries already present in the directory.
    #[must_use]
    pub fn duplicate_size(&self) -> u64 {
        self.duplicates.iter().map(|(e, _)| e.size).sum()
    }

    /// Bytes of archive entries missing from the directory.
    #[must_use]
    pub fn unique_archive_size(&self) -> u64 {
        self.unique_in_archive.iter().map(|e| e.size).sum()
    }

    /// Bytes of directory files absent from the archive.
    #[must_use]
    pub fn unique_directory_size(&self) -> u64 {
        self.unique_in_directory.iter().map(|e| e.size).sum()
    }

    /// Serializable totals.
    #[must_use]
    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary {
            archive_entries: self.archive_total(),
            duplicates: self.duplicates.len(),
            unique_in_archive: self.unique_in_archive.len(),
            unique_in_directory: self.unique_in_directory.len(),
            duplicate_size: self.duplicate_size(),
            unique_archive_size: self.unique_archive_size(),
            unique_directory_size: self.unique_directory_size(),
            errors: self.errors.total,
            interrupted: self.interrupted,
        }
    }
}

/// Totals of a [`Comparison`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonSummary {
    /// Archive entries compared
    pub archive_entries: usize,
    /// Archive entries present in the directory
    pub duplicates: usize,
    /// Archive entries missing from the directory
    pub unique_in_archive: usize,
    /// Directory files absent from the archive
    pub unique_in_directory: usize,
    /// Bytes of duplicates
    pub duplicate_size: u64,
    /// Bytes of archive-only entries
    pub unique_archive_size: u64,
    /// Bytes of directory-only files
    pub unique_directory_size: u64,
    /// Entries that failed to key
    pub errors: usize,
    /// Whether the comparison was interrupted
    pub interrupted: bool,
}

/// Compare keyed archive entries with a directory index.
///
/// Each entry whose key is in `index` is paired with the first directory
/// file inserted under that key. Directory files whose key no entry has are
/// returned in index order. Runs in time linear in both inputs.
#[must_use]
pub fn compare(
    entries: impl IntoIterator<Item = (ArchiveEntry, ContentKey)>,
    index: &DirectoryIndex,
) -> Comparison {
    let mut comparison = Comparison::default();
    let mut seen: HashSet<ContentKey> = HashSet::new();

    for (entry, key) in entries {
        match index.first(&key) {
            Some(existing) => {
                log::trace!("{} == {}", entry.display_path(), existing.path.display());
                comparison.duplicates.push((entry, existing.clone()));
            }
            None => comparison.unique_in_archive.push(entry),
        }
        seen.insert(key);
    }

    for (key, files) in index.iter() {
        if !seen.contains(key) {
            comparison.unique_in_directory.extend_from_slice(files);
        }
    }
    comparison
}

/// Compares one zip archive with one directory tree.
#[derive(Debug)]
pub struct ZipDirectoryComparator<'a> {
    scanner: DirectoryScanner,
    cache: Option<&'a FingerprintCache>,
    mtime_tolerance: f64,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: ProgressReporter,
}

impl<'a> ZipDirectoryComparator<'a> {
    /// Create a comparator keying both sides with `scanner`'s strategy.
    #[must_use]
    pub fn new(scanner: DirectoryScanner) -> Self {
        Self {
            scanner,
            cache: None,
            mtime_tolerance: DEFAULT_MTIME_TOLERANCE_SECS,
            shutdown_flag: None,
            progress: ProgressReporter::silent(),
        }
    }

    /// Key the directory through the decision procedure on `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: &'a FingerprintCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Mtime tolerance for cached records.
    #[must_use]
    pub fn with_mtime_tolerance(mut self, seconds: f64) -> Self {
        self.mtime_tolerance = seconds;
        self
    }

    /// Stop between files when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.scanner = self.scanner.with_shutdown_flag(Arc::clone(&flag));
        self.shutdown_flag = Some(flag);
        self
    }

    /// Send progress events to an aggregator.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.scanner = self.scanner.with_progress(progress.clone());
        self.progress = progress;
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn snapshot(&self, dir: &Path) -> Result<DestinationSnapshot, ReconcileError> {
        match self.cache {
            Some(cache) => {
                let mut destination = DestinationScanner::new(cache, self.scanner.clone())
                    .with_mtime_tolerance(self.mtime_tolerance);
                if let Some(flag) = &self.shutdown_flag {
                    destination = destination.with_shutdown_flag(Arc::clone(flag));
                }
                destination.snapshot(dir)
            }
            None => Ok(DestinationSnapshot::from_scan(dir, self.scanner.scan(dir)?)),
        }
    }

    /// Compare the entries of `zip` with the files under `dir`.
    ///
    /// An entry whose content cannot be read is classified unique to the
    /// archive and recorded in [`Comparison::errors`].
    ///
    /// # Errors
    ///
    /// Fails when the directory is missing, the archive cannot be opened,
    /// or the cache is unusable.
    pub fn compare_paths(&self, zip: &Path, dir: &Path) -> Result<Comparison, ReconcileError> {
        if !dir.exists() {
            return Err(ScanError::NotFound(dir.to_path_buf()).into());
        }
        let snapshot = self.snapshot(dir)?;
        let entries = list_entries(zip)?;
        let mut reader = ArchiveReader::open(zip)?;

        let mut fingerprinter = Fingerprinter::new(self.scanner.strategy());
        if let Some(flag) = &self.shutdown_flag {
            fingerprinter = fingerprinter.with_shutdown_flag(Arc::clone(flag));
        }

        let mut errors = ErrorSummary::default();
        let mut interrupted = snapshot.stats.interrupted;
        let mut keyed = Vec::with_capacity(entries.len());
        self.progress.phase_start(Phase::Hash, entries.len() as u64);
        for entry in entries {
            if interrupted || self.is_shutdown_requested() {
                interrupted = true;
                break;
            }
            // No directory file has this size, so no directory key can
            // match; the metadata key is enough to classify it.
            let key = if !snapshot.has_size(entry.size) {
                Ok(entry.content_key())
            } else {
                reader.key_for(&entry, &fingerprinter)
            };
            self.progress.item(Phase::Hash, entry.size);
            match key {
                Ok(key) => keyed.push((entry, key)),
                Err(ArchiveError::Interrupted(_)) => interrupted = true,
                Err(e) => {
                    log::warn!("{}", e);
                    errors.record(e.kind(), &e);
                    // Fail open: an unreadable entry still needs extraction.
                    let placeholder = ContentKey::from_raw(format!("unreadable:{}", entry.entry_path));
                    keyed.push((entry, placeholder));
                }
            }
        }
        self.progress.phase_end(Phase::Hash);

        let mut comparison = compare(keyed, snapshot.index());
        errors.merge(snapshot.stats.errors.clone());
        comparison.errors = errors;
        comparison.interrupted = interrupted;

        log::info!(
            "Compared {} with {}: {} duplicates, {} only in archive, {} only in directory",
            zip.display(),
            dir.display(),
            comparison.duplicates.len(),
            comparison.unique_in_archive.len(),
            comparison.unique_in_directory.len()
        );
        Ok(comparison)
    }
}

/// Result of comparing two directory trees.
#[derive(Debug, Clone, Default)]
pub struct DirectoryDiff {
    /// Source files whose content is absent from the destination
    pub missing: Vec<DirectoryEntry>,
    /// Source files paired with the first destination file holding them
    pub present: Vec<(DirectoryEntry, DirectoryEntry)>,
    /// Per-file failures on either side
    pub errors: ErrorSummary,
    /// Whether a shutdown request cut the diff short
    pub interrupted: bool,
}

impl DirectoryDiff {
    /// Bytes that would need copying.
    #[must_use]
    pub fn missing_size(&self) -> u64 {
        self.missing.iter().map(|e| e.size).sum()
    }

    /// Source paths missing from the destination.
    #[must_use]
    pub fn missing_paths(&self) -> Vec<PathBuf> {
        self.missing.iter().map(|e| e.path.clone()).collect()
    }
}

/// Compare two directory trees by content key.
///
/// # Errors
///
/// Fails when either root is missing or not a directory.
pub fn diff_directories(
    scanner: &DirectoryScanner,
    source: &Path,
    destination: &Path,
) -> Result<DirectoryDiff, ScanError> {
    let source_scan = scanner.scan(source)?;
    let dest_scan = scanner.scan(destination)?;
    let dest_index = build_index(&dest_scan.entries);

    let mut diff = DirectoryDiff {
        interrupted: source_scan.interrupted || dest_scan.interrupted,
        ..Default::default()
    };
    for entry in source_scan.entries {
        match dest_index.first(&entry.key) {
            Some(existing) => diff.present.push((entry, existing.clone())),
            None => diff.missing.push(entry),
        }
    }
    diff.errors = source_scan.errors;
    diff.errors.merge(dest_scan.errors);

    log::info!(
        "Diff {} -> {}: {} present, {} missing ({} strategy)",
        source.display(),
        destination.display(),
        diff.present.len(),
        diff.missing.len(),
        scanner.strategy()
    );
    Ok(diff)
}
