//! Everything that reads bytes or metadata: destination trees, zip
//! archives and the content keys computed from both.
//!
//! - [`walker`]: stat-only traversal of a directory tree
//! - [`hasher`]: the fingerprint engine ([`ContentKey`], [`Fingerprinter`])
//! - [`archive`]: zip discovery, central-directory listing, streaming entry keys
//! - [`directory`]: walk plus bounded parallel hashing of a directory tree
//! - [`path_utils`]: Unicode-stable relative path keys used by the cache
//!
//! ```no_run
//! use takeout_dedupe::scanner::{DirectoryScanner, Strategy};
//! use std::path::Path;
//!
//! let scan = DirectoryScanner::new(Strategy::SizePartial)
//!     .with_io_threads(8)
//!     .scan(Path::new("/photos"))?;
//! for entry in &scan.entries {
//!     println!("{} {}", entry.key, entry.path.display());
//! }
//! # Ok::<(), takeout_dedupe::scanner::ScanError>(())
//! ```

pub mod archive;
pub mod directory;
pub mod hasher;
pub mod path_utils;
pub mod walker;

use std::path::{Path, PathBuf};

pub use archive::{
    find_archives, list_entries, scan_archives, ArchiveEntry, ArchiveReader, ArchiveScan,
    ArchiveScanner,
};
pub use directory::{build_index, DirectoryEntry, DirectoryIndex, DirectoryScan, DirectoryScanner};
pub use hasher::{ContentKey, Fingerprinter, Strategy, WINDOW_SIZE};
pub use walker::Walker;

/// Size and mtime of one regular file, as seen by the [`Walker`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    /// Path under the walked root
    pub path: PathBuf,
    /// Length in bytes
    pub size: u64,
    /// Seconds since the Unix epoch, fractional
    pub mtime: f64,
}

impl FileStat {
    /// Bundle a stat result.
    #[must_use]
    pub fn new(path: PathBuf, size: u64, mtime: f64) -> Self {
        Self { path, size, mtime }
    }
}

/// What the [`Walker`] visits.
#[derive(Debug, Clone, Default)]
pub struct WalkerConfig {
    /// Follow symbolic links (jwalk detects cycles)
    pub follow_symlinks: bool,
    /// Skip dot-files and dot-directories
    pub skip_hidden: bool,
    /// Gitignore-style patterns, relative to the walked root
    pub ignore_patterns: Vec<String>,
}

impl WalkerConfig {
    /// Build a configuration from the three walk settings.
    #[must_use]
    pub fn new(follow_symlinks: bool, skip_hidden: bool, ignore_patterns: Vec<String>) -> Self {
        Self {
            follow_symlinks,
            skip_hidden,
            ignore_patterns,
        }
    }
}

/// Failures while walking or scanning a directory tree.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// The OS refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Nothing exists at the path.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// A directory was expected.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A shutdown request stopped the scan.
    #[error("Scan interrupted")]
    Interrupted,

    /// Any other I/O failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Short machine-readable kind, used to aggregate errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::NotADirectory(_) => "not_a_directory",
            Self::Interrupted => "interrupted",
            Self::Io { .. } => "io",
        }
    }

    /// Map an I/O error to the most specific variant.
    #[must_use]
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::Interrupted => Self::Interrupted,
            _ => Self::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Failures while computing the content key of one file.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The file vanished before it could be read.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// The OS refused to open the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// A shutdown request stopped the read.
    #[error("Hashing interrupted: {0}")]
    Interrupted(PathBuf),

    /// Any other read failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    /// Short machine-readable kind, used to aggregate errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Interrupted(_) => "interrupted",
            Self::Io { .. } => "io",
        }
    }

    /// Map an I/O error to the most specific variant.
    #[must_use]
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::Interrupted => Self::Interrupted(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Errors raised while reading zip archives.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    /// The archive file could not be opened.
    #[error("Cannot open archive {path}: {source}")]
    Open {
        /// Archive path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// The archive is not a readable zip container.
    #[error("Invalid zip archive {path}: {source}")]
    Zip {
        /// Archive path
        path: PathBuf,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// A named entry could not be located in the archive.
    #[error("Entry '{entry}' not readable in {path}: {source}")]
    Entry {
        /// Archive path
        path: PathBuf,
        /// Entry path inside the archive
        entry: String,
        /// The underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// Streaming an entry's content failed part-way.
    #[error("Read error for '{entry}' in {path}: {source}")]
    Read {
        /// Archive path
        path: PathBuf,
        /// Entry path inside the archive
        entry: String,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Reading stopped because shutdown was requested.
    #[error("Archive read interrupted: {0}")]
    Interrupted(PathBuf),
}

impl ArchiveError {
    /// Short machine-readable kind, used to aggregate errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "archive_open",
            Self::Zip { .. } => "archive_corrupt",
            Self::Entry { .. } => "archive_entry",
            Self::Read { .. } => "archive_read",
            Self::Interrupted(_) => "interrupted",
        }
    }
}
