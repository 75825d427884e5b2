//! Command-line interface definitions for takeout-dedupe.
//!
//! Global options (verbosity, cache location, config file) apply to every
//! subcommand; each subcommand maps to one workflow of the library.
//!
//! # Example
//!
//! ```bash
//! # Group duplicates across every export archive and write a manifest
//! takeout-dedupe analyze ~/Takeout --manifest manifest.json
//!
//! # What is left to extract into the library, using full hashes
//! takeout-dedupe plan ~/Takeout ~/Pictures --strategy full
//!
//! # Compare one archive with one folder
//! takeout-dedupe compare takeout-001.zip ~/Pictures --output json
//!
//! # Cache maintenance
//! takeout-dedupe cache stats
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::scanner::Strategy;

/// Incremental deduplication of exported zip archive sets.
///
/// Groups duplicate files across many zip archives without decompressing
/// them, and reconciles what remains against an organized destination tree
/// using a persistent fingerprint cache.
#[derive(Debug, Parser)]
#[command(name = "takeout-dedupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (TOML)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Named profile from the configuration file
    #[arg(long, value_name = "NAME", global = true)]
    pub profile: Option<String>,

    /// Path to the fingerprint cache database
    ///
    /// If not specified, a platform-specific cache directory is used.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache: Option<PathBuf>,

    /// Keep fingerprints in memory only for this run
    #[arg(long, global = true, conflicts_with = "cache")]
    pub no_cache: bool,

    /// Clear the fingerprint cache before running
    #[arg(long, global = true, conflicts_with = "no_cache")]
    pub clear_cache: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan archives and group duplicate entries
    Analyze(AnalyzeArgs),
    /// Decide which unique entries still need extracting into a destination
    Plan(PlanArgs),
    /// Compare one zip archive with one directory
    Compare(CompareArgs),
    /// Compare two directory trees by content
    Diff(DiffArgs),
    /// Check a manifest against a destination directory
    Reconcile(ReconcileArgs),
    /// Inspect or clear the fingerprint cache
    Cache(CacheArgs),
}

/// Options shared by commands that fingerprint files.
#[derive(Debug, Clone, Default, Args)]
pub struct ScanOptions {
    /// Fingerprint strategy (size_crc, size_partial, full)
    #[arg(long, value_enum, value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Number of I/O threads for hashing
    ///
    /// Lower values reduce disk thrashing on HDDs.
    #[arg(long, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Glob patterns to ignore in directory trees (repeatable)
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Follow symbolic links in directory trees
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,
}

/// Arguments for `analyze`.
#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Directory containing the exported zip archives
    #[arg(value_name = "INPUT_DIR")]
    pub input: PathBuf,

    /// Write a manifest of unique files to this path
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `plan`.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Directory containing the exported zip archives
    #[arg(value_name = "INPUT_DIR")]
    pub input: PathBuf,

    /// Destination directory
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Write the files still to extract as a manifest
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    #[command(flatten)]
    pub scan: ScanOptions,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `compare`.
#[derive(Debug, Args)]
pub struct CompareArgs {
    /// Zip archive
    #[arg(value_name = "ZIP")]
    pub zip: PathBuf,

    /// Directory to compare against
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    #[command(flatten)]
    pub scan: ScanOptions,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `diff`.
#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Source directory
    #[arg(value_name = "SOURCE_DIR")]
    pub source: PathBuf,

    /// Destination directory
    #[arg(value_name = "DEST_DIR")]
    pub dest: PathBuf,

    #[command(flatten)]
    pub scan: ScanOptions,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `reconcile`.
#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Manifest written by `analyze` or `plan`
    #[arg(value_name = "MANIFEST")]
    pub manifest: PathBuf,

    /// Destination directory
    #[arg(value_name = "OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for `cache`.
#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Cache action
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache maintenance actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum CacheAction {
    /// Show record counts
    Stats,
    /// Delete every record
    Clear,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl Commands {
    /// Scan options of the command, if it fingerprints files.
    #[must_use]
    pub fn scan_options(&self) -> Option<&ScanOptions> {
        match self {
            Commands::Plan(args) => Some(&args.scan),
            Commands::Compare(args) => Some(&args.scan),
            Commands::Diff(args) => Some(&args.scan),
            Commands::Analyze(_) | Commands::Reconcile(_) | Commands::Cache(_) => None,
        }
    }
}
