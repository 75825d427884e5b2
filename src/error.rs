//! Structured error handling, exit codes and per-file error accounting.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::cache::CacheError;
use crate::output::ManifestError;
use crate::reconcile::ReconcileError;
use crate::scanner::{ArchiveError, ScanError};

/// Default number of error messages kept verbatim in an [`ErrorSummary`].
pub const DEFAULT_ERROR_SAMPLE_SIZE: usize = 10;

/// Exit codes for the takeout-dedupe binary.
///
/// - 0: Success
/// - 1: General error (unexpected failure, unusable cache)
/// - 2: Nothing to do (no duplicates found / nothing left to extract)
/// - 3: Partial success (completed with some per-file errors)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed and produced results.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// Nothing to do: no duplicates, or every candidate already present.
    NothingToDo = 2,
    /// Partial success: completed, but some files or archives failed.
    PartialSuccess = 3,
    /// Interrupted: the run was interrupted by the user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "TD000",
            Self::GeneralError => "TD001",
            Self::NothingToDo => "TD002",
            Self::PartialSuccess => "TD003",
            Self::Interrupted => "TD130",
        }
    }
}

/// What a fatal error was about, found by walking its cause chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A shutdown request stopped the run
    Interrupted,
    /// The fingerprint cache could not be opened, read or written
    Cache,
    /// An input or destination root was missing or unreadable
    Scan,
    /// An archive could not be opened or listed
    Archive,
    /// The manifest could not be read, parsed or written
    Manifest,
    /// Anything else
    Other,
}

impl FailureKind {
    /// Classify `err` by the first typed error in its chain.
    #[must_use]
    pub fn classify(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ScanError>() {
                return Self::from_scan(e);
            }
            if let Some(e) = cause.downcast_ref::<ReconcileError>() {
                // `Scan` is transparent, so its ScanError never shows up
                // as a separate link of the chain.
                return match e {
                    ReconcileError::Scan(scan) => Self::from_scan(scan),
                    ReconcileError::Cache(_) => Self::Cache,
                    ReconcileError::Archive(_) => Self::Archive,
                };
            }
            if cause.is::<CacheError>() {
                return Self::Cache;
            }
            if cause.is::<ArchiveError>() {
                return Self::Archive;
            }
            if cause.is::<ManifestError>() {
                return Self::Manifest;
            }
        }
        Self::Other
    }

    fn from_scan(err: &ScanError) -> Self {
        match err {
            ScanError::Interrupted => Self::Interrupted,
            _ => Self::Scan,
        }
    }

    /// Process exit code for a run that failed this way.
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Interrupted => ExitCode::Interrupted,
            _ => ExitCode::GeneralError,
        }
    }

    /// Suggestion printed after the error message, if any.
    #[must_use]
    pub fn hint(self) -> Option<&'static str> {
        match self {
            Self::Cache => Some("retry with --clear-cache to rebuild the cache, or --no-cache to skip it"),
            Self::Archive => Some("check that the archive is a complete download"),
            _ => None,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "TD001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// What failed
    pub kind: FailureKind,
    /// Human-readable error message
    pub message: String,
    /// Suggested next step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Describe a fatal error for JSON output.
    #[must_use]
    pub fn new(err: &anyhow::Error, kind: FailureKind) -> Self {
        let exit_code = kind.exit_code();
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind,
            message: format!("{:#}", err),
            hint: kind.hint(),
            interrupted: kind == FailureKind::Interrupted,
        }
    }
}

/// Aggregated per-file failures of one operation.
///
/// Per-file errors never abort a scan; they are counted here and reported
/// together at the end: a total, a count per kind and the first N messages.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorSummary {
    /// Number of errors recorded
    pub total: usize,
    /// Count per error kind
    pub by_kind: BTreeMap<String, usize>,
    /// First messages, in the order they were recorded
    pub samples: Vec<String>,
    #[serde(skip)]
    sample_size: usize,
}

impl Default for ErrorSummary {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_SAMPLE_SIZE)
    }
}

impl ErrorSummary {
    /// Create an empty summary keeping up to `sample_size` messages.
    #[must_use]
    pub fn new(sample_size: usize) -> Self {
        Self {
            total: 0,
            by_kind: BTreeMap::new(),
            samples: Vec::new(),
            sample_size,
        }
    }

    /// Record one error.
    pub fn record(&mut self, kind: &str, message: impl fmt::Display) {
        self.total += 1;
        *self.by_kind.entry(kind.to_string()).or_insert(0) += 1;
        if self.samples.len() < self.sample_size {
            self.samples.push(message.to_string());
        }
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: ErrorSummary) {
        self.total += other.total;
        for (kind, count) in other.by_kind {
            *self.by_kind.entry(kind).or_insert(0) += count;
        }
        let room = self.sample_size.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Log the summary at warn level.
    pub fn log(&self, context: &str) {
        if self.is_empty() {
            return;
        }
        let kinds: Vec<String> = self
            .by_kind
            .iter()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .collect();
        log::warn!("{}: {} error(s) ({})", context, self.total, kinds.join(", "));
        for message in &self.samples {
            log::warn!("  {}", message);
        }
        if self.total > self.samples.len() {
            log::warn!("  ... and {} more", self.total - self.samples.len());
        }
    }
}
