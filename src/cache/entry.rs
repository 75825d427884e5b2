//! Records stored in the fingerprint cache.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an archive entry for date caching.
///
/// Two entries with an identical tuple refer to the same cached result,
/// even across runs. A lookup only hits when size and CRC also match, so
/// an archive rebuilt under the same name does not serve stale dates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryIdentity {
    /// Archive path as given to the scanner
    pub archive_path: String,
    /// Path of the entry inside the archive
    pub entry_path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC-32 from the archive's central directory
    pub crc32: u32,
}

impl EntryIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(
        archive_path: impl Into<String>,
        entry_path: impl Into<String>,
        size: u64,
        crc32: u32,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            entry_path: entry_path.into(),
            size,
            crc32,
        }
    }
}

/// Cached state of one destination file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Size when the key was computed
    pub size: u64,
    /// Modification time when the key was computed (seconds, fractional)
    pub mtime: f64,
    /// Content key under the strategy active at that time
    pub content_key: String,
}

impl DirectoryRecord {
    /// Whether this record may be reused for a file with the given stat.
    ///
    /// Size must match exactly; mtime within `tolerance_secs`.
    #[must_use]
    pub fn is_fresh(&self, size: u64, mtime: f64, tolerance_secs: f64) -> bool {
        self.size == size && (self.mtime - mtime).abs() < tolerance_secs
    }
}

/// Per-root scan watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWatermark {
    /// When the recorded scan started
    pub last_scanned: DateTime<Utc>,
    /// Number of files observed by that scan
    pub file_count: u64,
}

/// Row counts per cache table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounts {
    /// `file_dates` rows
    pub dates: u64,
    /// `directory_files` rows
    pub directory_files: u64,
    /// `directory_scans` rows
    pub directory_scans: u64,
}

impl CacheCounts {
    /// Sum of all rows.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.dates + self.directory_files + self.directory_scans
    }
}

/// Format used for stored entry dates (second precision).
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Render a date for storage.
#[must_use]
pub fn format_date(date: &NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a stored date. Malformed values are treated as absent.
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}
