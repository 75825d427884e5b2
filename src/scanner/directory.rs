//! Directory Scanner: content keys for every file of a directory tree.
//!
//! # Overview
//!
//! A scan is two passes:
//!
//! 1. a stat-only [`Walker`] pass listing `(path, size, mtime)`,
//! 2. a parallel hashing pass on a bounded rayon pool.
//!
//! Files that fail with permission or I/O errors are skipped with a warning
//! and counted in the returned [`ErrorSummary`]; they never abort the scan.
//! Results keep walk order regardless of which worker finished first.
//!
//! # Example
//!
//! ```no_run
//! use takeout_dedupe::scanner::{build_index, DirectoryScanner, Strategy};
//! use std::path::Path;
//!
//! let scanner = DirectoryScanner::new(Strategy::SizePartial).with_io_threads(4);
//! let scan = scanner.scan(Path::new("/photos"))?;
//! let index = build_index(&scan.entries);
//! println!("{} distinct keys", index.len());
//! # Ok::<(), takeout_dedupe::scanner::ScanError>(())
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::hasher::{ContentKey, Fingerprinter, Strategy};
use super::walker::Walker;
use super::{FileStat, HashError, ScanError, WalkerConfig};
use crate::error::{ErrorSummary, DEFAULT_ERROR_SAMPLE_SIZE};
use crate::progress::{Phase, ProgressReporter};

/// Default number of hashing workers.
pub const DEFAULT_IO_THREADS: usize = 4;

/// One hashed file of a directory tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// Absolute path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch (fractional)
    pub mtime: f64,
    /// Content key under the scanner's strategy
    pub key: ContentKey,
}

impl DirectoryEntry {
    /// Path relative to `root` for display, or the full path if outside it.
    #[must_use]
    pub fn display_path(&self, root: &Path) -> String {
        self.path
            .strip_prefix(root)
            .unwrap_or(&self.path)
            .display()
            .to_string()
    }
}

/// Outcome of a directory scan.
#[derive(Debug, Clone, Default)]
pub struct DirectoryScan {
    /// Hashed files, in walk order
    pub entries: Vec<DirectoryEntry>,
    /// Per-file failures
    pub errors: ErrorSummary,
    /// Whether a shutdown request cut the scan short
    pub interrupted: bool,
}

/// Run `op` on a dedicated pool of `threads` workers.
///
/// Falls back to the global pool if a dedicated one cannot be built.
pub(crate) fn with_pool<T, F>(threads: usize, op: F) -> T
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
    {
        Ok(pool) => pool.install(op),
        Err(e) => {
            log::warn!(
                "Failed to create custom thread pool ({}), using global pool with {} threads",
                e,
                rayon::current_num_threads()
            );
            op()
        }
    }
}

/// Walks and hashes directory trees under one [`Strategy`].
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    fingerprinter: Fingerprinter,
    walker_config: WalkerConfig,
    io_threads: usize,
    error_sample_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: ProgressReporter,
}

impl DirectoryScanner {
    /// Create a scanner for the given strategy.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(strategy),
            walker_config: WalkerConfig::default(),
            io_threads: DEFAULT_IO_THREADS,
            error_sample_size: DEFAULT_ERROR_SAMPLE_SIZE,
            shutdown_flag: None,
            progress: ProgressReporter::silent(),
        }
    }

    /// Number of hashing workers.
    #[must_use]
    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads.max(1);
        self
    }

    /// Walker options (hidden files, symlinks, ignore patterns).
    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Number of error messages kept verbatim.
    #[must_use]
    pub fn with_error_sample_size(mut self, size: usize) -> Self {
        self.error_sample_size = size;
        self
    }

    /// Stop between files when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.fingerprinter = self.fingerprinter.with_shutdown_flag(Arc::clone(&flag));
        self.shutdown_flag = Some(flag);
        self
    }

    /// Send progress events to an aggregator.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// The active strategy.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.fingerprinter.strategy()
    }

    /// Configured worker count.
    #[must_use]
    pub fn io_threads(&self) -> usize {
        self.io_threads
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    fn check_root(root: &Path) -> Result<(), ScanError> {
        let meta = std::fs::metadata(root).map_err(|e| ScanError::from_io(root, e))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(ScanError::NotADirectory(root.to_path_buf()))
        }
    }

    /// Stat-only walk of `root`.
    ///
    /// # Errors
    ///
    /// Fails only when `root` is missing or not a directory.
    pub fn walk(&self, root: &Path) -> Result<(Vec<FileStat>, ErrorSummary), ScanError> {
        Self::check_root(root)?;

        let mut walker = Walker::new(root, self.walker_config.clone());
        if let Some(flag) = &self.shutdown_flag {
            walker = walker.with_shutdown_flag(Arc::clone(flag));
        }

        let mut errors = ErrorSummary::new(self.error_sample_size);
        let mut files = Vec::new();
        self.progress.phase_start(Phase::Walk, 0);
        for result in walker.walk() {
            match result {
                Ok(stat) => {
                    self.progress.item(Phase::Walk, 0);
                    files.push(stat);
                }
                Err(e) => errors.record(e.kind(), &e),
            }
        }
        self.progress.phase_end(Phase::Walk);
        log::debug!("Walked {}: {} files", root.display(), files.len());
        Ok((files, errors))
    }

    /// Full scan: walk `root` and hash every file.
    ///
    /// # Errors
    ///
    /// Fails only when `root` is missing or not a directory.
    pub fn scan(&self, root: &Path) -> Result<DirectoryScan, ScanError> {
        let (files, walk_errors) = self.walk(root)?;
        let mut scan = self.hash_files(files, self.io_threads);
        let mut errors = walk_errors;
        errors.merge(std::mem::take(&mut scan.errors));
        scan.errors = errors;

        log::info!(
            "Scanned {}: {} files hashed ({} errors)",
            root.display(),
            scan.entries.len(),
            scan.errors.total
        );
        Ok(scan)
    }

    /// Hash only the given files, on a pool of `concurrency` workers.
    ///
    /// Each path is stat'ed right before hashing so the recorded size and
    /// mtime describe the bytes that were read.
    #[must_use]
    pub fn scan_subset(&self, paths: &[PathBuf], concurrency: usize) -> DirectoryScan {
        let mut errors = ErrorSummary::new(self.error_sample_size);
        let mut stats = Vec::with_capacity(paths.len());
        for path in paths {
            match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => {
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map_or(0.0, |d| d.as_secs_f64());
                    stats.push(FileStat::new(path.clone(), meta.len(), mtime));
                }
                Ok(_) => log::debug!("Skipping non-file: {}", path.display()),
                Err(e) => {
                    let err = HashError::from_io(path, e);
                    log::warn!("{}", err);
                    errors.record(err.kind(), &err);
                }
            }
        }

        let mut scan = self.hash_files(stats, concurrency);
        errors.merge(std::mem::take(&mut scan.errors));
        scan.errors = errors;
        scan
    }

    /// Hash already-stat'ed files on a bounded pool, preserving input order.
    #[must_use]
    pub fn hash_files(&self, files: Vec<FileStat>, concurrency: usize) -> DirectoryScan {
        let total = files.len();
        self.progress.phase_start(Phase::Hash, total as u64);

        let results: Vec<Result<DirectoryEntry, HashError>> = with_pool(concurrency, || {
            files
                .into_par_iter()
                .map(|stat| {
                    if self.is_shutdown_requested() {
                        return Err(HashError::Interrupted(stat.path));
                    }
                    let key = self.fingerprinter.key_for_file(&stat.path, stat.size);
                    self.progress.item(Phase::Hash, stat.size);
                    match key {
                        Ok(key) => {
                            log::trace!("Hashed {} -> {}", stat.path.display(), key);
                            Ok(DirectoryEntry {
                                path: stat.path,
                                size: stat.size,
                                mtime: stat.mtime,
                                key,
                            })
                        }
                        Err(e) => Err(e),
                    }
                })
                .collect()
        });
        self.progress.phase_end(Phase::Hash);

        let mut scan = DirectoryScan {
            entries: Vec::with_capacity(total),
            errors: ErrorSummary::new(self.error_sample_size),
            interrupted: false,
        };
        for result in results {
            match result {
                Ok(entry) => scan.entries.push(entry),
                Err(HashError::Interrupted(_)) => scan.interrupted = true,
                Err(e) => {
                    log::warn!("Skipping {}", e);
                    scan.errors.record(e.kind(), &e);
                }
            }
        }
        if scan.interrupted {
            log::info!(
                "Hashing interrupted after {} of {} files",
                scan.entries.len(),
                total
            );
        }
        scan
    }
}

/// Directory files grouped by content key, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIndex {
    by_key: HashMap<ContentKey, Vec<DirectoryEntry>>,
    order: Vec<ContentKey>,
    files: usize,
}

impl DirectoryIndex {
    /// Add one file.
    pub fn insert(&mut self, entry: DirectoryEntry) {
        self.files += 1;
        match self.by_key.get_mut(&entry.key) {
            Some(bucket) => bucket.push(entry),
            None => {
                self.order.push(entry.key.clone());
                self.by_key.insert(entry.key.clone(), vec![entry]);
            }
        }
    }

    /// Files sharing `key`, first-inserted first.
    #[must_use]
    pub fn get(&self, key: &ContentKey) -> Option<&[DirectoryEntry]> {
        self.by_key.get(key).map(Vec::as_slice)
    }

    /// First file inserted under `key`.
    #[must_use]
    pub fn first(&self, key: &ContentKey) -> Option<&DirectoryEntry> {
        self.by_key.get(key).and_then(|bucket| bucket.first())
    }

    /// Whether any file has `key`.
    #[must_use]
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Distinct keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.order.iter()
    }

    /// `(key, files)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContentKey, &[DirectoryEntry])> {
        self.order
            .iter()
            .filter_map(|k| self.by_key.get(k).map(|v| (k, v.as_slice())))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of files indexed.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files
    }
}

/// Group directory files by content key, keeping input order.
#[must_use]
pub fn build_index(entries: &[DirectoryEntry]) -> DirectoryIndex {
    let mut index = DirectoryIndex::default();
    for entry in entries {
        index.insert(entry.clone());
    }
    index
}
