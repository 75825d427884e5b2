//! Stat-only traversal of a destination tree.
//!
//! The [`Walker`] lists every regular file under a root together with its
//! size and modification time, using [`jwalk`] to read directories in
//! parallel. It never opens files: deciding whether any hashing is needed
//! at all only takes a stat pass.
//!
//! Empty files are included. They are ordinary members of the destination
//! tree and count toward the file count recorded in the scan watermark.
//!
//! Ignore patterns are applied while directories are read, so an ignored
//! subtree (e.g. a NAS `@eaDir/` thumbnail folder) is never descended into.
//!
//! # Example
//!
//! ```no_run
//! use takeout_dedupe::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("/photos"), WalkerConfig::default());
//! let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
//! println!("Found {} files", files.len());
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::{DirEntry, WalkDir};

use super::{FileStat, ScanError, WalkerConfig};

/// Stat-only walker over one root.
#[derive(Debug)]
pub struct Walker {
    root: PathBuf,
    config: WalkerConfig,
    /// Compiled ignore patterns, `None` when there are none
    matcher: Option<Arc<Gitignore>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a walker for `path`. Invalid ignore patterns are logged and
    /// skipped.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        let matcher = compile_patterns(path, &config.ignore_patterns).map(Arc::new);
        Self {
            root: path.to_path_buf(),
            config,
            matcher,
            shutdown_flag: None,
        }
    }

    /// Stop yielding entries once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// The root being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Walk the tree, yielding one [`FileStat`] per regular file.
    ///
    /// Per-path failures are yielded as [`ScanError`] values and iteration
    /// continues. Siblings are visited in file-name order so the output is
    /// deterministic.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileStat, ScanError>> + '_ {
        let matcher = self.matcher.clone();
        let root = self.root.clone();

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(move |_depth, _dir, _state, children| {
                if let Some(matcher) = &matcher {
                    children.retain(|child| match child {
                        Ok(entry) => !is_ignored(matcher, &root, entry),
                        Err(_) => true,
                    });
                }
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => CmpOrdering::Less,
                    (Err(_), Ok(_)) => CmpOrdering::Greater,
                    (Err(_), Err(_)) => CmpOrdering::Equal,
                });
            });

        walk_dir
            .into_iter()
            .take_while(move |_| {
                let stop = self.is_shutdown_requested();
                if stop {
                    log::debug!("Walk of {} stopped by shutdown request", self.root.display());
                }
                !stop
            })
            .filter_map(move |result| match result {
                Ok(entry) => self.stat_entry(&entry),
                Err(e) => {
                    let path = e.path().map_or_else(|| self.root.clone(), Path::to_path_buf);
                    log::warn!("Cannot read {}: {}", path.display(), e);
                    Some(Err(ScanError::Io {
                        path,
                        source: std::io::Error::other(e.to_string()),
                    }))
                }
            })
    }

    /// Stat one walked entry; `None` for anything that is not a regular file.
    fn stat_entry(&self, entry: &DirEntry<((), ())>) -> Option<Result<FileStat, ScanError>> {
        let file_type = entry.file_type();
        if file_type.is_dir() || entry.depth == 0 {
            return None;
        }
        let path = entry.path();
        if file_type.is_symlink() && !self.config.follow_symlinks {
            log::trace!("Skipping symlink: {}", path.display());
            return None;
        }

        let metadata = if self.config.follow_symlinks {
            fs::metadata(&path)
        } else {
            fs::symlink_metadata(&path)
        };
        match metadata {
            Ok(meta) if meta.is_file() => Some(Ok(file_stat(path, &meta))),
            Ok(_) => None,
            Err(e) => {
                // Vanished between listing and stat: not worth a warning.
                if e.kind() == std::io::ErrorKind::NotFound {
                    log::debug!("File disappeared during walk: {}", path.display());
                } else {
                    log::warn!("Cannot stat {}: {}", path.display(), e);
                }
                Some(Err(ScanError::from_io(&path, e)))
            }
        }
    }
}

fn compile_patterns(root: &Path, patterns: &[String]) -> Option<Gitignore> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        if let Err(e) = builder.add_line(None, pattern) {
            log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
        }
    }
    match builder.build() {
        Ok(matcher) if !matcher.is_empty() => Some(matcher),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Ignore patterns unusable, walking everything: {}", e);
            None
        }
    }
}

fn is_ignored(matcher: &Gitignore, root: &Path, entry: &DirEntry<((), ())>) -> bool {
    let path = entry.path();
    let relative = path.strip_prefix(root).unwrap_or(&path);
    let ignored = matcher
        .matched_path_or_any_parents(relative, entry.file_type().is_dir())
        .is_ignore();
    if ignored {
        log::trace!("Ignoring {}", path.display());
    }
    ignored
}

fn file_stat(path: PathBuf, metadata: &Metadata) -> FileStat {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64());
    FileStat::new(path, metadata.len(), mtime)
}
