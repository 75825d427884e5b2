//! Command dispatch for the `takeout-dedupe` binary.
//!
//! [`run_app`] wires configuration, logging, Ctrl+C handling, the fingerprint
//! cache and progress display around one subcommand, then prints its report.
//! The cache is opened before any scanning starts; failing to open it is
//! fatal.

use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::cache::{CacheError, FingerprintCache};
use crate::cli::{
    AnalyzeArgs, CacheAction, Cli, Commands, CompareArgs, DiffArgs, OutputFormat, PlanArgs,
    ReconcileArgs,
};
use crate::config::Config;
use crate::dates::{resolve_dates, ResolvedDates};
use crate::duplicates::{
    group_entries, identical_archives, summarize_archives, ArchiveGroups, GroupingStats,
};
use crate::error::ExitCode;
use crate::logging::init_logging;
use crate::output::json::{
    AnalyzeReport, CompareReport, DiffReport, JsonOutput, PlanReport, ReconcileReport,
};
use crate::output::manifest::Manifest;
use crate::output::text;
use crate::progress::{Progress, ProgressReporter};
use crate::reconcile::{diff_directories, DestinationScanner, Planner, ZipDirectoryComparator};
use crate::scanner::{ArchiveScan, ArchiveScanner, DirectoryScanner, ScanError, Strategy};
use crate::signal::{install_handler, Shutdown};

/// Per-run state shared by the command handlers.
struct RunContext<'a> {
    config: &'a Config,
    cache: &'a FingerprintCache,
    shutdown: &'a Shutdown,
    progress: ProgressReporter,
    quiet: bool,
}

impl RunContext<'_> {
    fn flag(&self) -> Arc<AtomicBool> {
        self.shutdown.flag()
    }

    fn ensure_running(&self) -> Result<(), ScanError> {
        if self.shutdown.is_requested() {
            return Err(ScanError::Interrupted);
        }
        Ok(())
    }

    fn directory_scanner(&self, strategy: Strategy) -> DirectoryScanner {
        DirectoryScanner::new(strategy)
            .with_io_threads(self.config.io_threads)
            .with_walker_config(self.config.walker_config())
            .with_error_sample_size(self.config.error_sample_size)
            .with_shutdown_flag(self.flag())
            .with_progress(self.progress.clone())
    }

    fn scan_archives(&self, input: &Path) -> anyhow::Result<ArchiveScan> {
        let scan = ArchiveScanner::new(input)
            .with_shutdown_flag(self.flag())
            .with_progress(self.progress.clone())
            .scan()
            .with_context(|| format!("Cannot scan archives under {}", input.display()))?;
        self.ensure_running()?;
        Ok(scan)
    }

    fn emit<T, F>(&self, format: OutputFormat, report: T, code: ExitCode, text: F) -> anyhow::Result<()>
    where
        T: Serialize,
        F: FnOnce(&mut io::StdoutLock<'static>, &T) -> io::Result<()>,
    {
        let mut stdout = io::stdout().lock();
        match format {
            OutputFormat::Json => JsonOutput::new(report, code).write_to(&mut stdout, true)?,
            OutputFormat::Text if self.quiet => {}
            OutputFormat::Text => text(&mut stdout, &report)?,
        }
        stdout.flush()?;
        Ok(())
    }
}

/// Pick the exit code for a finished command.
fn outcome(interrupted: bool, had_errors: bool, nothing_to_do: bool) -> ExitCode {
    if interrupted {
        ExitCode::Interrupted
    } else if had_errors {
        ExitCode::PartialSuccess
    } else if nothing_to_do {
        ExitCode::NothingToDo
    } else {
        ExitCode::Success
    }
}

fn open_cache(cli: &Cli, config: &Config) -> anyhow::Result<FingerprintCache> {
    let cache = if cli.no_cache {
        log::debug!("Using in-memory fingerprint cache");
        FingerprintCache::open_in_memory().context("Cannot create in-memory cache")?
    } else {
        let path = config.resolved_cache_path()?;
        log::debug!("Opening fingerprint cache at {}", path.display());
        FingerprintCache::open(&path)
            .with_context(|| format!("Cannot open fingerprint cache at {}", path.display()))?
    };
    let cache = cache.with_batch_size(config.date_batch_size);
    if cli.clear_cache {
        cache.clear().context("Cannot clear fingerprint cache")?;
        log::info!("Fingerprint cache cleared");
    }
    Ok(cache)
}

/// Run one invocation of the binary.
///
/// # Errors
///
/// Returns an error when the cache cannot be opened, an input root is
/// missing, or the run is interrupted between phases. Per-file failures are
/// reported in the command output and reflected in the exit code instead.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);
    text::set_color(!cli.no_color);

    let mut config = Config::load(cli.config.as_deref(), cli.profile.as_deref());
    config.merge_cli(&cli);
    if let Some(options) = cli.command.scan_options() {
        config.merge_scan_options(options);
    }
    log::debug!("Configuration: {:?}", config);

    let shutdown = install_handler()?;
    let cache = open_cache(&cli, &config)?;
    let (reporter, progress) = Progress::spawn(cli.quiet);

    let ctx = RunContext {
        config: &config,
        cache: &cache,
        shutdown: &shutdown,
        progress: reporter,
        quiet: cli.quiet,
    };
    let result = match &cli.command {
        Commands::Analyze(args) => cmd_analyze(&ctx, args),
        Commands::Plan(args) => cmd_plan(&ctx, args),
        Commands::Compare(args) => cmd_compare(&ctx, args),
        Commands::Diff(args) => cmd_diff(&ctx, args),
        Commands::Reconcile(args) => cmd_reconcile(&ctx, args),
        Commands::Cache(args) => cmd_cache(&ctx, args.action),
    };
    drop(ctx);

    let totals = progress.finish();
    log::trace!("Progress totals: {:?}", totals);
    settle(result, cache.close())
}

/// Combine a command's result with the final cache flush.
///
/// The command's own error always wins; a flush failure is only fatal when
/// the command itself succeeded.
fn settle(result: anyhow::Result<ExitCode>, closed: Result<(), CacheError>) -> anyhow::Result<ExitCode> {
    match (result, closed) {
        (result, Ok(())) => result,
        (Ok(_), Err(e)) => Err(anyhow::Error::from(e).context("Cannot flush fingerprint cache")),
        (Err(err), Err(e)) => {
            log::warn!("Cannot flush fingerprint cache: {}", e);
            Err(err)
        }
    }
}

fn group_and_date(
    ctx: &RunContext<'_>,
    scan: ArchiveScan,
) -> anyhow::Result<(ArchiveGroups, GroupingStats, ResolvedDates)> {
    let (groups, stats) = group_entries(scan.entries);
    log::info!(
        "Grouped {} entries into {} contents ({} duplicates)",
        stats.total_entries,
        stats.groups,
        stats.duplicates
    );
    let dates = resolve_dates(groups.iter().flat_map(|g| g.entries.iter()), ctx.cache)
        .context("Cannot resolve entry dates")?;
    ctx.ensure_running()?;
    Ok((groups, stats, dates))
}

fn cmd_analyze(ctx: &RunContext<'_>, args: &AnalyzeArgs) -> anyhow::Result<ExitCode> {
    let mut scan = ctx.scan_archives(&args.input)?;
    let archives = scan.archives.len();
    let failed = std::mem::take(&mut scan.failed_archives);
    let interrupted = scan.interrupted;
    let (groups, stats, dates) = group_and_date(ctx, scan)?;

    if let Some(path) = &args.manifest {
        Manifest::from_groups(&groups, &dates).write_to_path(path)?;
    }

    let summaries = summarize_archives(&groups);
    let identical = identical_archives(&summaries);
    let code = outcome(interrupted, !failed.is_empty(), stats.duplicates == 0);
    let report = AnalyzeReport::new(
        &args.input,
        archives,
        &failed,
        &groups,
        &stats,
        dates.stats,
        summaries,
        identical,
        interrupted,
    );
    ctx.emit(args.output, report, code, |out, r| text::write_analyze(out, r))?;
    Ok(code)
}

fn cmd_plan(ctx: &RunContext<'_>, args: &PlanArgs) -> anyhow::Result<ExitCode> {
    let mut scan = ctx.scan_archives(&args.input)?;
    let failed = std::mem::take(&mut scan.failed_archives);
    let (groups, _, dates) = group_and_date(ctx, scan)?;

    let strategy = ctx.config.strategy;
    let snapshot = DestinationScanner::new(ctx.cache, ctx.directory_scanner(strategy))
        .with_mtime_tolerance(ctx.config.mtime_tolerance_secs)
        .with_shutdown_flag(ctx.flag())
        .snapshot(&args.output_dir)
        .with_context(|| format!("Cannot scan destination {}", args.output_dir.display()))?;
    ctx.ensure_running()?;

    let mut plan = Planner::new(strategy)
        .with_io_threads(ctx.config.io_threads)
        .with_shutdown_flag(ctx.flag())
        .with_progress(ctx.progress.clone())
        .plan(&groups, &snapshot, &dates);
    plan.unreadable_archives.extend(failed);

    if let Some(path) = &args.manifest {
        Manifest::from_plan(&plan).write_to_path(path)?;
    }

    let code = outcome(
        plan.interrupted || snapshot.stats.interrupted,
        !plan.errors.is_empty()
            || !plan.unreadable_archives.is_empty()
            || !snapshot.stats.errors.is_empty(),
        plan.to_extract.is_empty(),
    );
    let report = PlanReport::new(
        &args.input,
        &args.output_dir,
        strategy,
        &snapshot.stats,
        &plan,
    );
    ctx.emit(args.output, report, code, |out, r| text::write_plan(out, r))?;
    Ok(code)
}

fn cmd_compare(ctx: &RunContext<'_>, args: &CompareArgs) -> anyhow::Result<ExitCode> {
    let strategy = ctx.config.strategy;
    let comparison = ZipDirectoryComparator::new(ctx.directory_scanner(strategy))
        .with_cache(ctx.cache)
        .with_mtime_tolerance(ctx.config.mtime_tolerance_secs)
        .with_shutdown_flag(ctx.flag())
        .with_progress(ctx.progress.clone())
        .compare_paths(&args.zip, &args.dir)
        .with_context(|| {
            format!(
                "Cannot compare {} with {}",
                args.zip.display(),
                args.dir.display()
            )
        })?;
    comparison.errors.log("Comparison");

    let code = outcome(
        comparison.interrupted,
        !comparison.errors.is_empty(),
        comparison.unique_in_archive.is_empty(),
    );
    let report = CompareReport::new(&args.zip, &args.dir, strategy, &comparison);
    ctx.emit(args.output, report, code, |out, r| text::write_compare(out, r))?;
    Ok(code)
}

fn cmd_diff(ctx: &RunContext<'_>, args: &DiffArgs) -> anyhow::Result<ExitCode> {
    let scanner = ctx.directory_scanner(ctx.config.strategy);
    let diff = diff_directories(&scanner, &args.source, &args.dest).with_context(|| {
        format!(
            "Cannot diff {} against {}",
            args.source.display(),
            args.dest.display()
        )
    })?;
    diff.errors.log("Diff");

    let code = outcome(
        diff.interrupted,
        !diff.errors.is_empty(),
        diff.missing.is_empty(),
    );
    let report = DiffReport::new(&args.source, &args.dest, &diff);
    ctx.emit(args.output, report, code, |out, r| text::write_diff(out, r))?;
    Ok(code)
}

fn cmd_reconcile(ctx: &RunContext<'_>, args: &ReconcileArgs) -> anyhow::Result<ExitCode> {
    let manifest = Manifest::read_from_path(&args.manifest)?;
    log::info!(
        "Manifest: {} unique files (generated {})",
        manifest.total_unique_files,
        manifest.generated
    );

    let snapshot = DestinationScanner::new(ctx.cache, ctx.directory_scanner(manifest.strategy))
        .with_mtime_tolerance(ctx.config.mtime_tolerance_secs)
        .with_shutdown_flag(ctx.flag())
        .snapshot(&args.output_dir)
        .with_context(|| format!("Cannot scan destination {}", args.output_dir.display()))?;
    let result = manifest.reconcile(&snapshot);

    let code = outcome(
        snapshot.stats.interrupted,
        !snapshot.stats.errors.is_empty(),
        result.is_complete(),
    );
    let report = ReconcileReport::new(&args.manifest, &args.output_dir, &snapshot.stats, &result);
    ctx.emit(args.output, report, code, |out, r| text::write_reconcile(out, r))?;
    Ok(code)
}

fn cmd_cache(ctx: &RunContext<'_>, action: CacheAction) -> anyhow::Result<ExitCode> {
    let location = ctx
        .cache
        .path()
        .map_or_else(|| "(in memory)".to_string(), |p| p.display().to_string());
    match action {
        CacheAction::Stats => {
            let counts = ctx.cache.count()?;
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "Cache:           {location}")?;
            writeln!(stdout, "Entry dates:     {}", counts.dates)?;
            writeln!(stdout, "Directory files: {}", counts.directory_files)?;
            writeln!(stdout, "Directory scans: {}", counts.directory_scans)?;
            Ok(if counts.total() == 0 {
                ExitCode::NothingToDo
            } else {
                ExitCode::Success
            })
        }
        CacheAction::Clear => {
            ctx.cache.clear()?;
            log::info!("Cleared fingerprint cache at {}", location);
            Ok(ExitCode::Success)
        }
    }
}
