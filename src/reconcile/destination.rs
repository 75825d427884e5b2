//! Destination snapshot: decide whether cached keys can be trusted.
//!
//! # Overview
//!
//! Before planning an extraction into a destination tree, every file there
//! needs a content key. Re-hashing tens of thousands of files on each run is
//! too slow, so [`DestinationScanner::snapshot`] first runs a stat-only walk
//! and compares it with the stored scan watermark:
//!
//! - **Trusted**: the file count matches the watermark, every file's mtime
//!   precedes the watermark time, and the cache holds one record per file
//!   under the active strategy. All keys are loaded from the cache and no
//!   file is opened.
//! - **Verify and patch**: otherwise, each file whose cached record still
//!   matches its size and mtime (within the configured tolerance) reuses the
//!   cached key; the rest are re-hashed with
//!   [`DirectoryScanner::scan_subset`]. New keys are written back in bulk,
//!   records of vanished files are pruned and the watermark is moved to the
//!   time this walk started.
//!
//! A missing destination is an empty snapshot, not an error.
//!
//! # Example
//!
//! ```no_run
//! use takeout_dedupe::cache::FingerprintCache;
//! use takeout_dedupe::reconcile::DestinationScanner;
//! use takeout_dedupe::scanner::{DirectoryScanner, Strategy};
//! use std::path::Path;
//!
//! let cache = FingerprintCache::open(Path::new("fingerprints.db"))?;
//! let scanner = DirectoryScanner::new(Strategy::SizePartial);
//! let snapshot = DestinationScanner::new(&cache, scanner).snapshot(Path::new("/photos"))?;
//! println!("{} files, trusted: {}", snapshot.stats.file_count, snapshot.stats.trusted);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::ReconcileError;
use crate::cache::{DirectoryRecord, FingerprintCache};
use crate::error::ErrorSummary;
use crate::scanner::path_utils::{relative_key, resolve_key};
use crate::scanner::{
    ContentKey, DirectoryEntry, DirectoryIndex, DirectoryScan, DirectoryScanner, FileStat,
    ScanError,
};

/// Default mtime tolerance when reusing a cached record, in seconds.
pub const DEFAULT_MTIME_TOLERANCE_SECS: f64 = 1.0;

/// How a snapshot was obtained.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotStats {
    /// Whether the cached snapshot was trusted wholesale
    pub trusted: bool,
    /// Files seen by the stat walk
    pub file_count: usize,
    /// Keys reused from the cache
    pub from_cache: usize,
    /// Keys computed in this run
    pub rehashed: usize,
    /// Files that were re-hashed, in walk order
    #[serde(skip)]
    pub rehashed_paths: Vec<PathBuf>,
    /// Cached records removed because their file is gone or unreadable
    pub pruned: usize,
    /// Per-file failures
    pub errors: ErrorSummary,
    /// Whether a shutdown request cut the snapshot short
    pub interrupted: bool,
}

/// Content keys of every file in a destination tree.
#[derive(Debug, Clone, Default)]
pub struct DestinationSnapshot {
    /// Destination root
    pub root: PathBuf,
    index: DirectoryIndex,
    keys_by_size: HashMap<u64, HashSet<ContentKey>>,
    /// How the snapshot was obtained
    pub stats: SnapshotStats,
}

impl DestinationSnapshot {
    /// Build a snapshot from already keyed entries.
    #[must_use]
    pub fn from_entries(root: &Path, entries: Vec<DirectoryEntry>, stats: SnapshotStats) -> Self {
        let mut index = DirectoryIndex::default();
        let mut keys_by_size: HashMap<u64, HashSet<ContentKey>> = HashMap::new();
        for entry in entries {
            keys_by_size
                .entry(entry.size)
                .or_default()
                .insert(entry.key.clone());
            index.insert(entry);
        }
        Self {
            root: root.to_path_buf(),
            index,
            keys_by_size,
            stats,
        }
    }

    /// Snapshot from a plain full scan, bypassing the cache.
    #[must_use]
    pub fn from_scan(root: &Path, scan: DirectoryScan) -> Self {
        let stats = SnapshotStats {
            file_count: scan.entries.len(),
            rehashed: scan.entries.len(),
            errors: scan.errors,
            interrupted: scan.interrupted,
            ..Default::default()
        };
        Self::from_entries(root, scan.entries, stats)
    }

    /// Keys grouped by file size.
    #[must_use]
    pub fn keys_by_size(&self) -> &HashMap<u64, HashSet<ContentKey>> {
        &self.keys_by_size
    }

    /// Whether any destination file has exactly `size` bytes.
    #[must_use]
    pub fn has_size(&self, size: u64) -> bool {
        self.keys_by_size.contains_key(&size)
    }

    /// Whether any destination file has `key`.
    #[must_use]
    pub fn contains(&self, key: &ContentKey) -> bool {
        key.size()
            .and_then(|size| self.keys_by_size.get(&size))
            .is_some_and(|keys| keys.contains(key))
    }

    /// Files by key, in walk order.
    #[must_use]
    pub fn index(&self) -> &DirectoryIndex {
        &self.index
    }

    /// Number of files in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.file_count()
    }

    /// Whether the destination holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.file_count() == 0
    }
}

/// Runs the trust-or-patch decision for destination trees.
#[derive(Debug)]
pub struct DestinationScanner<'a> {
    cache: &'a FingerprintCache,
    scanner: DirectoryScanner,
    mtime_tolerance: f64,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl<'a> DestinationScanner<'a> {
    /// Create a decision procedure over `cache`, hashing with `scanner`.
    #[must_use]
    pub fn new(cache: &'a FingerprintCache, scanner: DirectoryScanner) -> Self {
        Self {
            cache,
            scanner,
            mtime_tolerance: DEFAULT_MTIME_TOLERANCE_SECS,
            shutdown_flag: None,
        }
    }

    /// Maximum mtime difference for which a cached record is reused.
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

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Produce the content keys of every file under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Cache`] when the cache cannot be read or
    /// written, and [`ReconcileError::Scan`] when `root` exists but is not a
    /// readable directory. Per-file failures are collected in
    /// [`SnapshotStats::errors`].
    pub fn snapshot(&self, root: &Path) -> Result<DestinationSnapshot, ReconcileError> {
        let started = Utc::now();
        let watermark = self.cache.get_scan_watermark(root)?;

        let (files, walk_errors) = match self.scanner.walk(root) {
            Ok(walked) => walked,
            Err(ScanError::NotFound(_)) => {
                log::info!("Destination {} does not exist yet", root.display());
                return Ok(DestinationSnapshot::from_entries(root, Vec::new(), SnapshotStats::default()));
            }
            Err(e) => return Err(e.into()),
        };
        if self.is_shutdown_requested() {
            let stats = SnapshotStats {
                file_count: files.len(),
                errors: walk_errors,
                interrupted: true,
                ..Default::default()
            };
            return Ok(DestinationSnapshot::from_entries(root, Vec::new(), stats));
        }

        let max_mtime = files.iter().map(|f| f.mtime).fold(None, |max: Option<f64>, m| {
            Some(max.map_or(m, |x| x.max(m)))
        });
        let cached = self.cache.get_directory_entries(root)?;
        let strategy = self.scanner.strategy();

        let trusted = watermark.is_some_and(|w| {
            let watermark_secs = w.last_scanned.timestamp_micros() as f64 / 1_000_000.0;
            w.file_count == files.len() as u64
                && max_mtime.is_none_or(|m| m < watermark_secs)
                && cached.len() == files.len()
                && cached
                    .values()
                    .all(|r| ContentKey::from_raw(r.content_key.as_str()).matches_strategy(strategy))
        });

        if trusted {
            let mut entries: Vec<DirectoryEntry> = cached
                .into_iter()
                .map(|(rel, record)| DirectoryEntry {
                    path: resolve_key(root, &rel),
                    size: record.size,
                    mtime: record.mtime,
                    key: ContentKey::from_raw(record.content_key),
                })
                .collect();
            entries.sort_by(|a, b| a.path.cmp(&b.path));

            log::info!(
                "Trusting cached snapshot of {} ({} files)",
                root.display(),
                entries.len()
            );
            let stats = SnapshotStats {
                trusted: true,
                file_count: files.len(),
                from_cache: entries.len(),
                errors: walk_errors,
                ..Default::default()
            };
            return Ok(DestinationSnapshot::from_entries(root, entries, stats));
        }

        if let Some(w) = watermark {
            log::debug!(
                "Watermark for {} not trusted (cached {} files at {}, now {} files)",
                root.display(),
                w.file_count,
                w.last_scanned,
                files.len()
            );
        }
        self.verify_and_patch(root, files, walk_errors, cached, started)
    }

    fn verify_and_patch(
        &self,
        root: &Path,
        files: Vec<FileStat>,
        walk_errors: ErrorSummary,
        mut cached: HashMap<String, DirectoryRecord>,
        started: chrono::DateTime<Utc>,
    ) -> Result<DestinationSnapshot, ReconcileError> {
        let strategy = self.scanner.strategy();
        let file_count = files.len();

        // Walk order slots: Some(entry) once keyed.
        let mut slots: Vec<Option<DirectoryEntry>> = Vec::with_capacity(file_count);
        let mut keep: HashSet<String> = HashSet::with_capacity(file_count);
        let mut queue: Vec<PathBuf> = Vec::new();
        let mut queue_slots: HashMap<PathBuf, usize> = HashMap::new();

        for stat in files {
            let rel = relative_key(root, &stat.path);
            let reusable = rel.as_ref().and_then(|rel| cached.get(rel)).filter(|record| {
                record.is_fresh(stat.size, stat.mtime, self.mtime_tolerance)
                    && ContentKey::from_raw(record.content_key.as_str()).matches_strategy(strategy)
            });
            match (rel, reusable) {
                (Some(rel), Some(record)) => {
                    log::trace!("Cache hit: {}", stat.path.display());
                    slots.push(Some(DirectoryEntry {
                        key: ContentKey::from_raw(record.content_key.as_str()),
                        path: stat.path,
                        size: stat.size,
                        mtime: stat.mtime,
                    }));
                    keep.insert(rel);
                }
                _ => {
                    log::trace!("Cache miss: {}", stat.path.display());
                    queue_slots.insert(stat.path.clone(), slots.len());
                    queue.push(stat.path);
                    slots.push(None);
                }
            }
        }
        let from_cache = keep.len();

        let scan = self.scanner.scan_subset(&queue, self.scanner.io_threads());
        let mut records: Vec<(String, DirectoryRecord)> = Vec::with_capacity(scan.entries.len());
        let mut rehashed_paths = Vec::with_capacity(scan.entries.len());
        for entry in scan.entries {
            let Some(rel) = relative_key(root, &entry.path) else {
                continue;
            };
            records.push((
                rel.clone(),
                DirectoryRecord {
                    size: entry.size,
                    mtime: entry.mtime,
                    content_key: entry.key.as_str().to_string(),
                },
            ));
            keep.insert(rel);
            rehashed_paths.push(entry.path.clone());
            if let Some(&slot) = queue_slots.get(&entry.path) {
                slots[slot] = Some(entry);
            }
        }

        self.cache.set_directory_entries_bulk(root, &records)?;

        cached.retain(|rel, _| !keep.contains(rel));
        let stale: Vec<String> = cached.into_keys().collect();
        let pruned = if stale.is_empty() {
            0
        } else {
            self.cache.remove_directory_entries(root, &stale)?
        };

        if scan.interrupted {
            log::info!("Snapshot of {} interrupted; watermark left unchanged", root.display());
        } else {
            self.cache
                .set_scan_watermark_at(root, file_count as u64, started)?;
        }

        let mut errors = walk_errors;
        errors.merge(scan.errors);

        let entries: Vec<DirectoryEntry> = slots.into_iter().flatten().collect();
        let stats = SnapshotStats {
            trusted: false,
            file_count,
            from_cache,
            rehashed: rehashed_paths.len(),
            rehashed_paths,
            pruned,
            errors,
            interrupted: scan.interrupted,
        };
        log::info!(
            "Verified {}: {} files, {} from cache, {} re-hashed, {} pruned",
            root.display(),
            stats.file_count,
            stats.from_cache,
            stats.rehashed,
            stats.pruned
        );
        Ok(DestinationSnapshot::from_entries(root, entries, stats))
    }
}
