//! Report and manifest output.
//!
//! - [`json`]: machine-readable reports for every command
//! - [`text`]: colored terminal summaries
//! - [`manifest`]: the unique-file manifest written by `analyze` and read
//!   back by `reconcile`
//!
//! # Example
//!
//! ```no_run
//! use takeout_dedupe::output::manifest::Manifest;
//! use std::path::Path;
//!
//! let manifest = Manifest::read_from_path(Path::new("takeout.manifest.json")).unwrap();
//! println!("{} unique files", manifest.total_unique_files);
//! ```

pub mod json;
pub mod manifest;
pub mod text;

// Re-export main types
pub use json::{
    AnalyzeReport, CompareReport, DiffReport, JsonOutput, JsonOutputError, PlanReport,
    ReconcileReport,
};
pub use manifest::{Manifest, ManifestError, ManifestFile, ManifestReconciliation};
