//! Reconciliation of archive contents against destination trees.
//!
//! This module provides functionality for:
//! - Deciding whether a cached destination snapshot can be trusted
//! - Comparing one zip archive with one directory
//! - Comparing two directory trees
//! - Planning which canonical entries still need extracting
//!
//! # Architecture
//!
//! - [`destination`]: trust-or-patch decision over the fingerprint cache
//! - [`comparator`]: zip/directory and directory/directory comparison
//! - [`plan`]: extraction planning for grouped archive entries

pub mod comparator;
pub mod destination;
pub mod plan;

pub use comparator::{
    compare, diff_directories, Comparison, ComparisonSummary, DirectoryDiff,
    ZipDirectoryComparator,
};
pub use destination::{
    DestinationScanner, DestinationSnapshot, SnapshotStats, DEFAULT_MTIME_TOLERANCE_SECS,
};
pub use plan::{ExtractionPlan, PlanStatus, PlannedFile, Planner};

use crate::cache::CacheError;
use crate::scanner::{ArchiveError, ScanError};

/// Errors that abort a reconciliation step.
///
/// Per-file failures never surface here; they are collected in the
/// [`ErrorSummary`](crate::error::ErrorSummary) of each result.
#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// The fingerprint cache could not be read or written.
    #[error("Fingerprint cache error: {0}")]
    Cache(#[from] CacheError),

    /// A scan root was missing or unreadable.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// An archive could not be opened or listed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
