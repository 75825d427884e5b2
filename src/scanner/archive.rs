//! Zip archive discovery, listing and entry fingerprinting.
//!
//! # Overview
//!
//! Listing reads only the central directory of each archive: name,
//! uncompressed size, CRC-32 and the DOS timestamp come straight from the
//! metadata, nothing is decompressed. Content is only streamed when a key is
//! needed under [`Strategy::SizePartial`] or [`Strategy::Full`].
//!
//! Archives that cannot be opened are recorded in
//! [`ArchiveScan::failed_archives`] and the batch carries on.
//!
//! # Example
//!
//! ```no_run
//! use takeout_dedupe::scanner::archive::ArchiveScanner;
//! use std::path::Path;
//!
//! let scan = ArchiveScanner::new(Path::new("/exports")).scan()?;
//! println!("{} entries in {} archives", scan.entries.len(), scan.archives.len());
//! # Ok::<(), takeout_dedupe::scanner::ScanError>(())
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use walkdir::WalkDir;
use zip::ZipArchive;

use super::hasher::{ContentKey, Fingerprinter, Strategy};
use super::{ArchiveError, ScanError};
use crate::cache::EntryIdentity;
use crate::progress::{Phase, ProgressReporter};

/// DOS timestamps at or before this year are placeholders, not real dates.
const DOS_PLACEHOLDER_YEAR: u16 = 1980;

/// One file stored inside a zip archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveEntry {
    /// Archive containing the entry
    pub archive_path: PathBuf,
    /// Path of the entry inside the archive
    pub entry_path: String,
    /// Position in the archive's central directory
    pub index: usize,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC-32 recorded by the archive
    pub crc32: u32,
    /// Embedded modification time, if it is a real date
    pub modified: Option<NaiveDateTime>,
}

impl ArchiveEntry {
    /// Create an entry without an embedded timestamp.
    #[must_use]
    pub fn new(
        archive_path: impl Into<PathBuf>,
        entry_path: impl Into<String>,
        size: u64,
        crc32: u32,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            entry_path: entry_path.into(),
            index: 0,
            size,
            crc32,
            modified: None,
        }
    }

    /// Attach an embedded timestamp.
    #[must_use]
    pub fn with_modified(mut self, modified: Option<NaiveDateTime>) -> Self {
        self.modified = modified;
        self
    }

    /// Set the central-directory index.
    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// The `size_crc` key, available without reading content.
    #[must_use]
    pub fn content_key(&self) -> ContentKey {
        ContentKey::from_crc(self.size, self.crc32)
    }

    /// Final path component of the entry.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.entry_path
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(&self.entry_path)
    }

    /// `archive.zip:path/inside` for messages and reports.
    #[must_use]
    pub fn display_path(&self) -> String {
        let archive = self
            .archive_path
            .file_name()
            .map_or_else(|| self.archive_path.to_string_lossy(), |n| n.to_string_lossy());
        format!("{}:{}", archive, self.entry_path)
    }
}

impl From<&ArchiveEntry> for EntryIdentity {
    fn from(entry: &ArchiveEntry) -> Self {
        EntryIdentity::new(
            entry.archive_path.to_string_lossy(),
            entry.entry_path.clone(),
            entry.size,
            entry.crc32,
        )
    }
}

fn dos_to_naive(dt: zip::DateTime) -> Option<NaiveDateTime> {
    if dt.year() <= DOS_PLACEHOLDER_YEAR {
        return None;
    }
    NaiveDate::from_ymd_opt(i32::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()))?
        .and_hms_opt(
            u32::from(dt.hour()),
            u32::from(dt.minute()),
            u32::from(dt.second()),
        )
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Find every `*.zip` under `root` (case-insensitive), sorted by path.
///
/// Unreadable subdirectories are skipped with a warning.
#[must_use]
pub fn find_archives(root: &Path) -> Vec<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("Skipping unreadable path while searching archives: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_zip(e.path()))
        .map(walkdir::DirEntry::into_path)
        .collect();
    archives.sort();
    archives
}

fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>, ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    ZipArchive::new(BufReader::new(file)).map_err(|source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    })
}

/// List the non-directory entries of one archive from its central directory.
///
/// # Errors
///
/// Returns [`ArchiveError`] if the archive cannot be opened or its central
/// directory is corrupt.
pub fn list_entries(path: &Path) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = open_archive(path)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(|source| ArchiveError::Zip {
            path: path.to_path_buf(),
            source,
        })?;
        if file.is_dir() {
            continue;
        }
        entries.push(
            ArchiveEntry::new(path, file.name(), file.size(), file.crc32())
                .with_index(i)
                .with_modified(file.last_modified().and_then(dos_to_naive)),
        );
    }
    Ok(entries)
}

/// Result of scanning an input root for archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveScan {
    /// Archives that were listed successfully, in sorted order
    pub archives: Vec<PathBuf>,
    /// All entries, archive by archive, in central-directory order
    pub entries: Vec<ArchiveEntry>,
    /// Archives that could not be read, with the reason
    pub failed_archives: Vec<(PathBuf, String)>,
    /// Whether the scan stopped early on a shutdown request
    pub interrupted: bool,
}

impl ArchiveScan {
    /// Total uncompressed bytes across all entries.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Discovers and lists every archive under an input root.
#[derive(Debug)]
pub struct ArchiveScanner {
    root: PathBuf,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: ProgressReporter,
}

impl ArchiveScanner {
    /// Create a scanner for `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            shutdown_flag: None,
            progress: ProgressReporter::silent(),
        }
    }

    /// Stop between archives when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report one progress item per archive.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Find and list all archives.
    ///
    /// # Errors
    ///
    /// Fails only when the root itself is missing or not a directory.
    /// Individual unreadable archives end up in `failed_archives`.
    pub fn scan(&self) -> Result<ArchiveScan, ScanError> {
        let meta = std::fs::metadata(&self.root).map_err(|e| ScanError::from_io(&self.root, e))?;
        if !meta.is_dir() {
            return Err(ScanError::NotADirectory(self.root.clone()));
        }

        let paths = find_archives(&self.root);
        log::info!("Found {} zip archive(s) under {}", paths.len(), self.root.display());

        let mut scan = ArchiveScan::default();
        self.progress.phase_start(Phase::Archives, paths.len() as u64);
        for path in paths {
            if self.is_shutdown_requested() {
                log::info!("Archive scan interrupted");
                scan.interrupted = true;
                break;
            }
            self.progress.message(path.display().to_string());
            match list_entries(&path) {
                Ok(entries) => {
                    log::debug!("{}: {} entries", path.display(), entries.len());
                    scan.entries.extend(entries);
                    scan.archives.push(path);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    scan.failed_archives.push((path, e.to_string()));
                }
            }
            self.progress.item(Phase::Archives, 0);
        }
        self.progress.phase_end(Phase::Archives);

        log::info!(
            "Listed {} entries from {} archive(s) ({} unreadable)",
            scan.entries.len(),
            scan.archives.len(),
            scan.failed_archives.len()
        );
        Ok(scan)
    }
}

/// Convenience wrapper around [`ArchiveScanner`].
///
/// # Errors
///
/// See [`ArchiveScanner::scan`].
pub fn scan_archives(root: &Path) -> Result<ArchiveScan, ScanError> {
    ArchiveScanner::new(root).scan()
}

/// An open archive used to compute content keys for its entries.
pub struct ArchiveReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("path", &self.path)
            .field("entries", &self.archive.len())
            .finish()
    }
}

impl ArchiveReader {
    /// Open an archive for reading.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the archive cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        Ok(Self {
            path: path.to_path_buf(),
            archive: open_archive(path)?,
        })
    }

    /// Archive path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compute the key of `entry` under the fingerprinter's strategy.
    ///
    /// `size_crc` keys come from metadata; the other strategies decompress
    /// the entry once, front to back.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the entry cannot be located or its content
    /// fails to decompress.
    pub fn key_for(&mut self, entry: &ArchiveEntry, fp: &Fingerprinter) -> Result<ContentKey, ArchiveError> {
        if fp.strategy() == Strategy::SizeCrc {
            return Ok(entry.content_key());
        }

        // Prefer the recorded index; fall back to the name if the archive was
        // rewritten since listing.
        let index_matches = self
            .archive
            .by_index_raw(entry.index)
            .is_ok_and(|f| f.name() == entry.entry_path);
        let file = if index_matches {
            self.archive.by_index(entry.index)
        } else {
            self.archive.by_name(&entry.entry_path)
        }
        .map_err(|source| ArchiveError::Entry {
            path: self.path.clone(),
            entry: entry.entry_path.clone(),
            source,
        })?;

        fp.key_for_reader(file, entry.size).map_err(|source| {
            if source.kind() == std::io::ErrorKind::Interrupted {
                ArchiveError::Interrupted(self.path.clone())
            } else {
                ArchiveError::Read {
                    path: self.path.clone(),
                    entry: entry.entry_path.clone(),
                    source,
                }
            }
        })
    }
}
