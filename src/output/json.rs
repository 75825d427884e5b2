//! JSON reports for scripting.
//!
//! Each command builds a report struct; [`JsonOutput`] wraps it with the
//! exit code so scripts get the outcome and the data in one document.
//!
//! # Example
//!
//! ```
//! use takeout_dedupe::error::ExitCode;
//! use takeout_dedupe::output::json::{DiffReport, JsonOutput};
//! use takeout_dedupe::reconcile::DirectoryDiff;
//! use std::path::Path;
//!
//! let report = DiffReport::new(Path::new("a"), Path::new("b"), &DirectoryDiff::default());
//! let output = JsonOutput::new(report, ExitCode::NothingToDo);
//! let json = output.to_json().unwrap();
//! assert!(json.contains("\"exit_code\":2"));
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::dates::DateStats;
use crate::duplicates::{ArchiveGroups, ArchiveSummary, GroupingStats};
use crate::error::{ErrorSummary, ExitCode};
use crate::output::manifest::{ManifestFile, ManifestReconciliation};
use crate::reconcile::{
    Comparison, ComparisonSummary, DirectoryDiff, ExtractionPlan, PlanStatus, PlannedFile,
    SnapshotStats,
};
use crate::scanner::{ContentKey, Strategy};

/// A report plus the run's exit code.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<T: Serialize> {
    /// Command-specific data
    #[serde(flatten)]
    pub report: T,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "TD000")
    pub exit_code_name: String,
}

impl<T: Serialize> JsonOutput<T> {
    /// Wrap `report` with `exit_code`.
    #[must_use]
    pub fn new(report: T, exit_code: ExitCode) -> Self {
        Self {
            report,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write JSON to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W, pretty: bool) -> Result<(), JsonOutputError> {
        let json = if pretty {
            self.to_json_pretty()?
        } else {
            self.to_json()?
        };
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Errors that can occur during JSON output.
#[derive(thiserror::Error, Debug)]
pub enum JsonOutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during writing
    #[error("I/O error during JSON generation: {0}")]
    Io(#[from] std::io::Error),
}

/// A path that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonFailure {
    /// Offending path
    pub path: PathBuf,
    /// What went wrong
    pub error: String,
}

impl JsonFailure {
    fn from_pairs(pairs: &[(PathBuf, String)]) -> Vec<Self> {
        pairs
            .iter()
            .map(|(path, error)| Self {
                path: path.clone(),
                error: error.clone(),
            })
            .collect()
    }
}

/// A duplicate group, canonical entry first.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEntryGroup {
    /// Group key
    pub key: ContentKey,
    /// Entry size in bytes
    pub size: u64,
    /// `archive.zip:path` of every member
    pub entries: Vec<String>,
}

/// Output of `analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    /// Scanned root
    pub input: PathBuf,
    /// Archives listed successfully
    pub archives: usize,
    /// Archives that could not be listed
    pub failed_archives: Vec<JsonFailure>,
    /// Grouping counters
    pub grouping: GroupingStats,
    /// Date resolution counters
    pub dates: DateStats,
    /// Groups with more than one member
    pub duplicate_groups: Vec<JsonEntryGroup>,
    /// Per-archive content and signature
    pub archive_summaries: Vec<ArchiveSummary>,
    /// Sets of archives with identical content
    pub identical_archives: Vec<Vec<PathBuf>>,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl AnalyzeReport {
    /// Build from the grouping results.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        input: &Path,
        archives: usize,
        failed_archives: &[(PathBuf, String)],
        groups: &ArchiveGroups,
        grouping: &GroupingStats,
        dates: DateStats,
        archive_summaries: Vec<ArchiveSummary>,
        identical_archives: Vec<Vec<PathBuf>>,
        interrupted: bool,
    ) -> Self {
        Self {
            input: input.to_path_buf(),
            archives,
            failed_archives: JsonFailure::from_pairs(failed_archives),
            grouping: grouping.clone(),
            dates,
            duplicate_groups: groups
                .duplicates()
                .map(|group| JsonEntryGroup {
                    key: group.key.clone(),
                    size: group.entries.first().map_or(0, |e| e.size),
                    entries: group.entries.iter().map(|e| e.display_path()).collect(),
                })
                .collect(),
            archive_summaries,
            identical_archives,
            interrupted,
        }
    }
}

/// One canonical entry with its plan decision.
#[derive(Debug, Clone, Serialize)]
pub struct JsonPlannedFile {
    /// `archive.zip:path`
    pub source: String,
    /// Entry size in bytes
    pub size: u64,
    /// Group key
    pub group_key: ContentKey,
    /// Redundant copies elsewhere in the archive set
    pub duplicate_count: usize,
    /// Resolved date
    pub date: Option<NaiveDateTime>,
    /// Destination path relative to the output root
    pub proposed_location: String,
    /// Decision
    pub status: PlanStatus,
    /// Matching destination file, when already present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<PathBuf>,
}

impl From<&PlannedFile> for JsonPlannedFile {
    fn from(planned: &PlannedFile) -> Self {
        Self {
            source: planned.entry.display_path(),
            size: planned.entry.size,
            group_key: planned.group_key.clone(),
            duplicate_count: planned.duplicate_count,
            date: planned.date,
            proposed_location: planned.proposed_location.clone(),
            status: planned.status,
            existing: planned.existing.clone(),
        }
    }
}

/// Output of `plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    /// Archive root
    pub input: PathBuf,
    /// Destination root
    pub output_dir: PathBuf,
    /// Strategy used for destination keys
    pub strategy: Strategy,
    /// How the destination snapshot was obtained
    pub snapshot: SnapshotStats,
    /// Bytes still to extract
    pub extract_size: u64,
    /// Bytes already in the destination
    pub present_size: u64,
    /// Entries still to extract
    pub to_extract: Vec<JsonPlannedFile>,
    /// Entries already in the destination
    pub already_present: Vec<JsonPlannedFile>,
    /// Archives that could not be read for keying
    pub unreadable_archives: Vec<JsonFailure>,
    /// Per-file errors
    pub errors: ErrorSummary,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl PlanReport {
    /// Build from a finished plan.
    #[must_use]
    pub fn new(
        input: &Path,
        output_dir: &Path,
        strategy: Strategy,
        snapshot: &SnapshotStats,
        plan: &ExtractionPlan,
    ) -> Self {
        Self {
            input: input.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            strategy,
            snapshot: snapshot.clone(),
            extract_size: plan.extract_size(),
            present_size: plan.present_size(),
            to_extract: plan.to_extract.iter().map(JsonPlannedFile::from).collect(),
            already_present: plan
                .already_present
                .iter()
                .map(JsonPlannedFile::from)
                .collect(),
            unreadable_archives: JsonFailure::from_pairs(&plan.unreadable_archives),
            errors: plan.errors.clone(),
            interrupted: plan.interrupted,
        }
    }
}

/// An archive entry and the directory file with the same content.
#[derive(Debug, Clone, Serialize)]
pub struct JsonMatch {
    /// Path inside the archive
    pub entry: String,
    /// Matching file
    pub file: PathBuf,
}

/// Output of `compare`.
#[derive(Debug, Clone, Serialize)]
pub struct CompareReport {
    /// Compared archive
    pub zip: PathBuf,
    /// Compared directory
    pub dir: PathBuf,
    /// Strategy used on both sides
    pub strategy: Strategy,
    /// Totals
    pub summary: ComparisonSummary,
    /// Entries present on both sides
    pub duplicates: Vec<JsonMatch>,
    /// Entries only in the archive
    pub unique_in_archive: Vec<String>,
    /// Files only in the directory
    pub unique_in_directory: Vec<PathBuf>,
    /// Per-file errors
    pub errors: ErrorSummary,
}

impl CompareReport {
    /// Build from a comparison.
    #[must_use]
    pub fn new(zip: &Path, dir: &Path, strategy: Strategy, comparison: &Comparison) -> Self {
        Self {
            zip: zip.to_path_buf(),
            dir: dir.to_path_buf(),
            strategy,
            summary: comparison.summary(),
            duplicates: comparison
                .duplicates
                .iter()
                .map(|(entry, file)| JsonMatch {
                    entry: entry.entry_path.clone(),
                    file: file.path.clone(),
                })
                .collect(),
            unique_in_archive: comparison
                .unique_in_archive
                .iter()
                .map(|e| e.entry_path.clone())
                .collect(),
            unique_in_directory: comparison
                .unique_in_directory
                .iter()
                .map(|f| f.path.clone())
                .collect(),
            errors: comparison.errors.clone(),
        }
    }
}

/// Output of `diff`.
#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    /// Source root
    pub source: PathBuf,
    /// Destination root
    pub dest: PathBuf,
    /// Source files with a counterpart in the destination
    pub present: usize,
    /// Bytes of source files missing from the destination
    pub missing_size: u64,
    /// Source files missing from the destination
    pub missing: Vec<PathBuf>,
    /// Per-file errors
    pub errors: ErrorSummary,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl DiffReport {
    /// Build from a directory diff.
    #[must_use]
    pub fn new(source: &Path, dest: &Path, diff: &DirectoryDiff) -> Self {
        Self {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            present: diff.present.len(),
            missing_size: diff.missing_size(),
            missing: diff.missing_paths(),
            errors: diff.errors.clone(),
            interrupted: diff.interrupted,
        }
    }
}

/// Output of `reconcile`.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Manifest read
    pub manifest: PathBuf,
    /// Destination root
    pub output_dir: PathBuf,
    /// Records in the manifest
    pub total: usize,
    /// Share already extracted, in percent
    pub extracted_pct: f64,
    /// How the destination snapshot was obtained
    pub snapshot: SnapshotStats,
    /// Pending records per year
    pub pending_by_year: BTreeMap<String, usize>,
    /// Records already in the destination
    pub extracted: Vec<ManifestFile>,
    /// Records still to extract
    pub pending: Vec<ManifestFile>,
    /// Records whose source archive is gone
    pub source_missing: Vec<ManifestFile>,
}

impl ReconcileReport {
    /// Build from a manifest classification.
    #[must_use]
    pub fn new(
        manifest: &Path,
        output_dir: &Path,
        snapshot: &SnapshotStats,
        result: &ManifestReconciliation,
    ) -> Self {
        Self {
            manifest: manifest.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            total: result.total(),
            extracted_pct: result.extracted_pct(),
            snapshot: snapshot.clone(),
            pending_by_year: result.pending_by_year(),
            extracted: result.extracted.clone(),
            pending: result.pending.clone(),
            source_missing: result.source_missing.clone(),
        }
    }
}
