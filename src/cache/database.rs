//! SQLite-backed fingerprint cache.
//!
//! # Overview
//!
//! [`FingerprintCache`] persists three kinds of facts between runs:
//!
//! - `file_dates`: archive entry identity -> resolved date (or none)
//! - `directory_files`: (root, relative path) -> (size, mtime, content key)
//! - `directory_scans`: root -> scan watermark (start time, file count)
//!
//! Every write uses `INSERT OR REPLACE` on the table's primary key. Date
//! writes are buffered and committed in batches inside one transaction, so
//! a reader never observes half a batch. All access goes through a single
//! mutex; the pending buffer lives behind the same lock and is never
//! exposed.
//!
//! Dropping the handle flushes pending dates. Call [`FingerprintCache::close`]
//! to flush and observe the result.
//!
//! # Example
//!
//! ```no_run
//! use takeout_dedupe::cache::{EntryIdentity, FingerprintCache};
//! use chrono::NaiveDate;
//!
//! let cache = FingerprintCache::open(std::path::Path::new("/tmp/fingerprints.db"))?;
//! let id = EntryIdentity::new("Takeout-001.zip", "Photos/a.jpg", 100, 0xAAAA);
//! let when = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
//! cache.set_date(&id, Some(when))?;
//! cache.close()?;
//! # Ok::<(), takeout_dedupe::cache::CacheError>(())
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::entry::{format_date, parse_date, CacheCounts, DirectoryRecord, EntryIdentity, ScanWatermark};
use crate::scanner::path_utils::root_key;

/// Default number of buffered date writes per commit.
pub const DEFAULT_DATE_BATCH_SIZE: usize = 100;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS file_dates (
    archive_path   TEXT NOT NULL,
    entry_path     TEXT NOT NULL,
    size           INTEGER NOT NULL,
    checksum       INTEGER NOT NULL,
    extracted_date TEXT,
    created_at     TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (archive_path, entry_path)
);
CREATE INDEX IF NOT EXISTS idx_file_dates_archive ON file_dates(archive_path);

CREATE TABLE IF NOT EXISTS directory_files (
    dir_path    TEXT NOT NULL,
    file_path   TEXT NOT NULL,
    size        INTEGER NOT NULL,
    mtime       REAL NOT NULL,
    content_key TEXT NOT NULL,
    created_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (dir_path, file_path)
);
CREATE INDEX IF NOT EXISTS idx_directory_files_dir ON directory_files(dir_path);
CREATE INDEX IF NOT EXISTS idx_directory_files_key ON directory_files(content_key);

CREATE TABLE IF NOT EXISTS directory_scans (
    dir_path     TEXT PRIMARY KEY,
    last_scanned TIMESTAMP NOT NULL,
    file_count   INTEGER NOT NULL
);
";

/// Errors raised by the fingerprint cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The underlying SQLite operation failed.
    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The cache directory could not be created.
    #[error("Cannot create cache directory {path}: {source}")]
    Io {
        /// Directory that could not be created
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A thread panicked while holding the cache lock.
    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

struct PendingDate {
    identity: EntryIdentity,
    date: Option<String>,
}

struct Inner {
    conn: Connection,
    pending_dates: Vec<PendingDate>,
}

/// Persistent fingerprint cache handle.
///
/// Safe to share across hashing workers (`&FingerprintCache` is `Sync`).
pub struct FingerprintCache {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
    batch_size: usize,
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("path", &self.path)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl FingerprintCache {
    /// Open (or create) the cache database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the parent directory cannot be created or the file is not a
    /// usable SQLite database. Callers should treat this as fatal.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        log::debug!("Opened fingerprint cache at {}", path.display());
        Ok(Self::from_connection(conn, Some(path.to_path_buf())))
    }

    /// Open a throwaway in-memory cache (used for `--no-cache` runs).
    ///
    /// # Errors
    ///
    /// Fails only if SQLite itself cannot initialise.
    pub fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, None))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                conn,
                pending_dates: Vec::new(),
            }),
            path,
            batch_size: DEFAULT_DATE_BATCH_SIZE,
        }
    }

    /// Set the number of buffered date writes per commit (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Database file path, or `None` for an in-memory cache.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| CacheError::LockPoisoned)
    }

    // === Entry dates ===

    /// Look up the committed date for an archive entry.
    ///
    /// Hits only when size and CRC also match. Stored values that fail to
    /// parse, or are not text at all, are treated as a miss. Pending
    /// (unflushed) writes are not visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_date(&self, identity: &EntryIdentity) -> CacheResult<Option<NaiveDateTime>> {
        let inner = self.lock()?;
        let raw: Option<Option<String>> = match inner
            .conn
            .query_row(
                "SELECT extracted_date FROM file_dates
                 WHERE archive_path = ?1 AND entry_path = ?2 AND size = ?3 AND checksum = ?4",
                params![
                    identity.archive_path,
                    identity.entry_path,
                    identity.size as i64,
                    i64::from(identity.crc32)
                ],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
        {
            Ok(raw) => raw,
            Err(e) if is_malformed_record(&e) => {
                log::warn!(
                    "Ignoring malformed cached date for {}:{}: {}",
                    identity.archive_path,
                    identity.entry_path,
                    e
                );
                None
            }
            Err(e) => return Err(e.into()),
        };

        let date = raw.flatten().as_deref().and_then(parse_date);
        log::trace!(
            "Date cache {} for {}:{}",
            if date.is_some() { "hit" } else { "miss" },
            identity.archive_path,
            identity.entry_path
        );
        Ok(date)
    }

    /// Buffer a date write; commits automatically once the batch is full.
    ///
    /// # Errors
    ///
    /// Returns an error if an automatic batch commit fails. The batch stays
    /// buffered and is retried on the next flush.
    pub fn set_date(&self, identity: &EntryIdentity, date: Option<NaiveDateTime>) -> CacheResult<()> {
        let mut inner = self.lock()?;
        inner.pending_dates.push(PendingDate {
            identity: identity.clone(),
            date: date.as_ref().map(format_date),
        });
        if inner.pending_dates.len() >= self.batch_size {
            Self::flush_dates(&mut inner)?;
        }
        Ok(())
    }

    /// Commit all buffered date writes in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is committed and
    /// the buffer is kept.
    pub fn flush(&self) -> CacheResult<()> {
        let mut inner = self.lock()?;
        Self::flush_dates(&mut inner)
    }

    fn flush_dates(inner: &mut Inner) -> CacheResult<()> {
        if inner.pending_dates.is_empty() {
            return Ok(());
        }

        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO file_dates
                 (archive_path, entry_path, size, checksum, extracted_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for pending in &inner.pending_dates {
                stmt.execute(params![
                    pending.identity.archive_path,
                    pending.identity.entry_path,
                    pending.identity.size as i64,
                    i64::from(pending.identity.crc32),
                    pending.date
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("Flushed {} cached dates", inner.pending_dates.len());
        inner.pending_dates.clear();
        Ok(())
    }

    /// Number of date writes waiting for the next commit.
    #[must_use]
    pub fn pending_dates(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.pending_dates.len())
    }

    /// Load every committed, parseable date. Malformed rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_cached_dates_bulk(&self) -> CacheResult<HashMap<EntryIdentity, NaiveDateTime>> {
        let inner = self.lock()?;
        let mut stmt = inner.conn.prepare(
            "SELECT archive_path, entry_path, size, checksum, extracted_date
             FROM file_dates WHERE extracted_date IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                EntryIdentity::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    column_u64(row, 2)?,
                    column_u32(row, 3)?,
                ),
                row.get::<_, String>(4)?,
            ))
        })?;

        Ok(skip_malformed(rows, "file_dates")?
            .into_iter()
            .filter_map(|(identity, raw)| Some((identity, parse_date(&raw)?)))
            .collect())
    }

    // === Directory files ===

    /// All cached records under `root`, keyed by relative path.
    ///
    /// A row that cannot be decoded (wrong column type, negative size) is
    /// left out, so the file it describes is re-hashed and its record
    /// overwritten by the next snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_directory_entries(&self, root: &Path) -> CacheResult<HashMap<String, DirectoryRecord>> {
        let inner = self.lock()?;
        let mut stmt = inner.conn.prepare(
            "SELECT file_path, size, mtime, content_key
             FROM directory_files WHERE dir_path = ?1",
        )?;
        let rows = stmt.query_map(params![root_key(root)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                DirectoryRecord {
                    size: column_u64(row, 1)?,
                    mtime: row.get(2)?,
                    content_key: row.get(3)?,
                },
            ))
        })?;
        Ok(skip_malformed(rows, "directory_files")?.into_iter().collect())
    }

    /// Cached content keys under `root`, grouped by file size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_content_keys_by_size(&self, root: &Path) -> CacheResult<HashMap<u64, HashSet<String>>> {
        let inner = self.lock()?;
        let mut stmt = inner
            .conn
            .prepare("SELECT size, content_key FROM directory_files WHERE dir_path = ?1")?;
        let rows = stmt.query_map(params![root_key(root)], |row| {
            Ok((column_u64(row, 0)?, row.get::<_, String>(1)?))
        })?;
        let mut result: HashMap<u64, HashSet<String>> = HashMap::new();
        for (size, key) in skip_malformed(rows, "directory_files")? {
            result.entry(size).or_default().insert(key);
        }
        Ok(result)
    }

    /// Store one directory record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_directory_entry(
        &self,
        root: &Path,
        relative_path: &str,
        record: &DirectoryRecord,
    ) -> CacheResult<()> {
        let inner = self.lock()?;
        inner.conn.execute(
            "INSERT OR REPLACE INTO directory_files (dir_path, file_path, size, mtime, content_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                root_key(root),
                relative_path,
                record.size as i64,
                record.mtime,
                record.content_key
            ],
        )?;
        Ok(())
    }

    /// Store many directory records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is written.
    pub fn set_directory_entries_bulk(
        &self,
        root: &Path,
        records: &[(String, DirectoryRecord)],
    ) -> CacheResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let root = root_key(root);
        let mut inner = self.lock()?;
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO directory_files (dir_path, file_path, size, mtime, content_key)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (relative, record) in records {
                stmt.execute(params![
                    root,
                    relative,
                    record.size as i64,
                    record.mtime,
                    record.content_key
                ])?;
            }
        }
        tx.commit()?;
        log::debug!("Stored {} directory records for {}", records.len(), root);
        Ok(())
    }

    /// Remove the record for a file known to be deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_directory_entry(&self, root: &Path, relative_path: &str) -> CacheResult<()> {
        let inner = self.lock()?;
        inner.conn.execute(
            "DELETE FROM directory_files WHERE dir_path = ?1 AND file_path = ?2",
            params![root_key(root), relative_path],
        )?;
        Ok(())
    }

    /// Remove many records in one transaction. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is removed.
    pub fn remove_directory_entries(&self, root: &Path, relative_paths: &[String]) -> CacheResult<usize> {
        if relative_paths.is_empty() {
            return Ok(0);
        }
        let root = root_key(root);
        let mut inner = self.lock()?;
        let tx = inner
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare_cached("DELETE FROM directory_files WHERE dir_path = ?1 AND file_path = ?2")?;
            for relative in relative_paths {
                removed += stmt.execute(params![root, relative])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Forget everything cached for `root`, including its watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn clear_directory(&self, root: &Path) -> CacheResult<()> {
        let root = root_key(root);
        let mut inner = self.lock()?;
        let tx = inner.conn.transaction()?;
        tx.execute("DELETE FROM directory_files WHERE dir_path = ?1", params![root])?;
        tx.execute("DELETE FROM directory_scans WHERE dir_path = ?1", params![root])?;
        tx.commit()?;
        Ok(())
    }

    // === Scan watermarks ===

    /// Watermark of the last recorded scan of `root`.
    ///
    /// A stored row that fails to decode or parse is treated as no watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_scan_watermark(&self, root: &Path) -> CacheResult<Option<ScanWatermark>> {
        let inner = self.lock()?;
        let row: Option<(String, u64)> = match inner
            .conn
            .query_row(
                "SELECT last_scanned, file_count FROM directory_scans WHERE dir_path = ?1",
                params![root_key(root)],
                |row| Ok((row.get::<_, String>(0)?, column_u64(row, 1)?)),
            )
            .optional()
        {
            Ok(row) => row,
            Err(e) if is_malformed_record(&e) => {
                log::warn!("Ignoring malformed scan watermark for {}: {}", root.display(), e);
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(row.and_then(|(raw, count)| {
            let parsed = DateTime::parse_from_rfc3339(&raw).ok().map_or_else(
                || parse_date(&raw).map(|naive| naive.and_utc()),
                |dt| Some(dt.with_timezone(&Utc)),
            );
            if parsed.is_none() {
                log::warn!("Ignoring malformed scan watermark '{}' for {}", raw, root.display());
            }
            parsed.map(|last_scanned| ScanWatermark {
                last_scanned,
                file_count: count,
            })
        }))
    }

    /// Record a scan of `root` that observed `file_count` files, now.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_scan_watermark(&self, root: &Path, file_count: u64) -> CacheResult<()> {
        self.set_scan_watermark_at(root, file_count, Utc::now())
    }

    /// Record a scan of `root` with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_scan_watermark_at(
        &self,
        root: &Path,
        file_count: u64,
        last_scanned: DateTime<Utc>,
    ) -> CacheResult<()> {
        let inner = self.lock()?;
        inner.conn.execute(
            "INSERT OR REPLACE INTO directory_scans (dir_path, last_scanned, file_count)
             VALUES (?1, ?2, ?3)",
            params![
                root_key(root),
                last_scanned.to_rfc3339_opts(SecondsFormat::Micros, true),
                file_count as i64
            ],
        )?;
        Ok(())
    }

    // === Maintenance ===

    /// Wipe every table and drop pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.lock()?;
        inner.pending_dates.clear();
        let tx = inner.conn.transaction()?;
        tx.execute("DELETE FROM file_dates", [])?;
        tx.execute("DELETE FROM directory_files", [])?;
        tx.execute("DELETE FROM directory_scans", [])?;
        tx.commit()?;
        log::info!("Cleared fingerprint cache");
        Ok(())
    }

    /// Committed row counts per table.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn count(&self) -> CacheResult<CacheCounts> {
        let inner = self.lock()?;
        let count = |table: &str| -> CacheResult<u64> {
            let n: i64 = inner
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(CacheCounts {
            dates: count("file_dates")?,
            directory_files: count("directory_files")?,
            directory_scans: count("directory_scans")?,
        })
    }

    /// Flush pending writes and release the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(self) -> CacheResult<()> {
        self.flush()
    }
}

/// Whether `e` describes one undecodable row rather than a failed query.
fn is_malformed_record(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

/// Collect decoded rows, logging and dropping the malformed ones.
fn skip_malformed<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    table: &str,
) -> CacheResult<Vec<T>> {
    let mut decoded = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        match row {
            Ok(value) => decoded.push(value),
            Err(e) if is_malformed_record(&e) => {
                log::debug!("Skipping malformed {} row: {}", table, e);
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    if skipped > 0 {
        log::warn!("Ignored {} malformed {} rows; they are treated as misses", skipped, table);
    }
    Ok(decoded)
}

fn column_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

fn column_u32(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

impl Drop for FingerprintCache {
    fn drop(&mut self) {
        let Ok(inner) = self.inner.get_mut() else {
            return;
        };
        if let Err(e) = Self::flush_dates(inner) {
            log::warn!("Failed to flush pending cache writes: {}", e);
        }
    }
}
