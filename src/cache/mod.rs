//! Persistent fingerprint cache.
//!
//! This module stores derived facts between runs so repeated reconciliation
//! of the same destination tree does not re-read unchanged files.
//!
//! # Architecture
//!
//! * [`database`]: SQLite persistence, batching, locking.
//! * [`entry`]: the records stored in the cache and their validation logic.
//!
//! # Cache Invalidation
//!
//! A cached directory record is reused only while both of these still hold
//! for the file on disk:
//! * size equals the stored size
//! * mtime is within the configured tolerance (1 second by default)
//!
//! Otherwise the file is re-hashed and the record replaced. The per-root
//! scan watermark lets the whole snapshot be trusted without looking at
//! individual records when nothing in the tree changed since the last scan.

pub mod database;
pub mod entry;

pub use database::{CacheError, CacheResult, FingerprintCache, DEFAULT_DATE_BATCH_SIZE};
pub use entry::{CacheCounts, DirectoryRecord, EntryIdentity, ScanWatermark};
