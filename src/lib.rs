//! takeout-dedupe - incremental deduplication of exported zip archive sets
//!
//! Finds duplicate files across many zip archives without decompressing
//! them, and works out which unique files still need extracting into an
//! organized destination tree. A persistent SQLite fingerprint cache makes
//! repeated runs over a large destination cheap.
//!
//! # Modules
//!
//! - [`scanner`]: content keys, archive listing, directory scanning
//! - [`duplicates`]: grouping archive entries by content
//! - [`cache`]: the persistent fingerprint cache
//! - [`reconcile`]: destination snapshots, comparisons and extraction plans
//! - [`dates`]: entry dates and proposed destination paths
//! - [`output`]: JSON/text reports and the unique-file manifest

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dates;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod reconcile;
pub mod scanner;
pub mod signal;

pub use app::run_app;
