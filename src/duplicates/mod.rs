//! Duplicate detection across archive exports.
//!
//! This module provides functionality for:
//! - Filename normalization and name partitioning (phase 1)
//! - Metadata checksum grouping (phase 2)
//! - Per-archive summaries, content signatures and redundant archives

pub mod groups;
pub mod signature;

pub use groups::{
    group_entries, is_synthetic_key, normalize_filename, ArchiveGroups, EntryGroup,
    GroupingStats, SYNTHETIC_KEY_PREFIX,
};
pub use signature::{identical_archives, summarize_archives, ArchiveSignature, ArchiveSummary};
