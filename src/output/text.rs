//! Human-readable summaries.
//!
//! Colors come from `yansi`; call [`set_color`] once at startup to honor
//! `--no-color`. Sizes are printed with `bytesize`.

use std::io::{self, Write};

use bytesize::ByteSize;
use yansi::Paint;

use super::json::{AnalyzeReport, CompareReport, DiffReport, PlanReport, ReconcileReport};
use crate::error::ErrorSummary;
use crate::reconcile::SnapshotStats;

/// Number of paths listed before a section is truncated.
pub const LIST_LIMIT: usize = 20;

/// Enable or disable colored output globally.
pub fn set_color(enabled: bool) {
    if enabled {
        yansi::enable();
    } else {
        yansi::disable();
    }
}

fn size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

fn heading<W: Write>(out: &mut W, title: &str) -> io::Result<()> {
    writeln!(out, "{}", title.bold().underline())
}

fn list<W: Write, I, S>(out: &mut W, items: I, total: usize) -> io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: std::fmt::Display,
{
    for item in items.into_iter().take(LIST_LIMIT) {
        writeln!(out, "    {item}")?;
    }
    if total > LIST_LIMIT {
        writeln!(out, "    {}", format!("... and {} more", total - LIST_LIMIT).dim())?;
    }
    Ok(())
}

fn errors<W: Write>(out: &mut W, summary: &ErrorSummary) -> io::Result<()> {
    if summary.is_empty() {
        return Ok(());
    }
    writeln!(out, "  {} {}", "Errors:".red().bold(), summary.total)?;
    for (kind, count) in &summary.by_kind {
        writeln!(out, "    {kind}: {count}")?;
    }
    for message in &summary.samples {
        writeln!(out, "    {}", message.dim())?;
    }
    Ok(())
}

fn snapshot<W: Write>(out: &mut W, stats: &SnapshotStats) -> io::Result<()> {
    let source = if stats.trusted {
        "cache (trusted)".green().to_string()
    } else {
        format!(
            "{} from cache, {} rehashed, {} pruned",
            stats.from_cache, stats.rehashed, stats.pruned
        )
    };
    writeln!(out, "  Destination files: {} ({})", stats.file_count, source)
}

fn interrupted<W: Write>(out: &mut W, flag: bool) -> io::Result<()> {
    if flag {
        writeln!(out, "{}", "Interrupted: results are partial".yellow().bold())?;
    }
    Ok(())
}

/// Print the `analyze` summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_analyze<W: Write>(out: &mut W, report: &AnalyzeReport) -> io::Result<()> {
    let g = &report.grouping;
    heading(out, "Archive analysis")?;
    writeln!(out, "  Archives:   {}", report.archives)?;
    writeln!(out, "  Entries:    {} ({})", g.total_entries, size(g.total_size))?;
    writeln!(
        out,
        "  Unique:     {} ({:.1}% settled by name and size)",
        g.groups,
        g.elimination_rate()
    )?;
    writeln!(
        out,
        "  Duplicates: {} in {} groups ({} redundant)",
        g.duplicates.yellow(),
        g.duplicate_groups,
        size(g.wasted_size)
    )?;
    writeln!(
        out,
        "  Dates:      {} cached, {} from archives, {} missing",
        report.dates.from_cache, report.dates.from_archive, report.dates.missing
    )?;

    if !report.failed_archives.is_empty() {
        writeln!(out, "  {}", "Unreadable archives:".red())?;
        list(
            out,
            report
                .failed_archives
                .iter()
                .map(|f| format!("{}: {}", f.path.display(), f.error)),
            report.failed_archives.len(),
        )?;
    }

    let redundant: Vec<_> = report
        .archive_summaries
        .iter()
        .filter(|a| a.is_redundant())
        .collect();
    if !redundant.is_empty() {
        writeln!(out, "  {}", "Archives whose content exists elsewhere:".cyan())?;
        list(
            out,
            redundant.iter().map(|a| a.path.display().to_string()),
            redundant.len(),
        )?;
    }
    for set in &report.identical_archives {
        let names: Vec<String> = set.iter().map(|p| p.display().to_string()).collect();
        writeln!(out, "  Identical: {}", names.join(" = "))?;
    }
    interrupted(out, report.interrupted)
}

/// Print the `plan` summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_plan<W: Write>(out: &mut W, report: &PlanReport) -> io::Result<()> {
    heading(out, "Extraction plan")?;
    writeln!(out, "  Strategy:  {}", report.strategy)?;
    snapshot(out, &report.snapshot)?;
    writeln!(
        out,
        "  To extract:      {} ({})",
        report.to_extract.len().green().bold(),
        size(report.extract_size)
    )?;
    writeln!(
        out,
        "  Already present: {} ({})",
        report.already_present.len().cyan(),
        size(report.present_size)
    )?;
    list(
        out,
        report
            .to_extract
            .iter()
            .map(|f| format!("{} -> {}", f.source, f.proposed_location)),
        report.to_extract.len(),
    )?;
    if !report.unreadable_archives.is_empty() {
        writeln!(
            out,
            "  {} {} (entries kept for extraction)",
            "Unreadable archives:".red(),
            report.unreadable_archives.len()
        )?;
    }
    errors(out, &report.errors)?;
    interrupted(out, report.interrupted)
}

/// Print the `compare` summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_compare<W: Write>(out: &mut W, report: &CompareReport) -> io::Result<()> {
    let s = &report.summary;
    heading(
        out,
        &format!("{} vs {}", report.zip.display(), report.dir.display()),
    )?;
    writeln!(out, "  Strategy:  {}", report.strategy)?;
    writeln!(out, "  Archive entries:     {}", s.archive_entries)?;
    writeln!(
        out,
        "  In both:             {} ({})",
        s.duplicates.cyan(),
        size(s.duplicate_size)
    )?;
    writeln!(
        out,
        "  Only in archive:     {} ({})",
        s.unique_in_archive.green().bold(),
        size(s.unique_archive_size)
    )?;
    list(out, &report.unique_in_archive, report.unique_in_archive.len())?;
    writeln!(
        out,
        "  Only in directory:   {} ({})",
        s.unique_in_directory,
        size(s.unique_directory_size)
    )?;
    errors(out, &report.errors)?;
    interrupted(out, s.interrupted)
}

/// Print the `diff` summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_diff<W: Write>(out: &mut W, report: &DiffReport) -> io::Result<()> {
    heading(
        out,
        &format!("{} -> {}", report.source.display(), report.dest.display()),
    )?;
    writeln!(out, "  Present in destination: {}", report.present.cyan())?;
    writeln!(
        out,
        "  Missing from destination: {} ({})",
        report.missing.len().yellow().bold(),
        size(report.missing_size)
    )?;
    list(
        out,
        report.missing.iter().map(|p| p.display().to_string()),
        report.missing.len(),
    )?;
    errors(out, &report.errors)?;
    interrupted(out, report.interrupted)
}

/// Print the `reconcile` summary.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_reconcile<W: Write>(out: &mut W, report: &ReconcileReport) -> io::Result<()> {
    let pct = |n: usize| {
        if report.total == 0 {
            0.0
        } else {
            n as f64 / report.total as f64 * 100.0
        }
    };
    heading(out, "Reconciliation")?;
    snapshot(out, &report.snapshot)?;
    writeln!(out, "  Records:        {}", report.total)?;
    writeln!(
        out,
        "  Extracted:      {} ({:.1}%)",
        report.extracted.len().green(),
        report.extracted_pct
    )?;
    writeln!(
        out,
        "  Pending:        {} ({:.1}%)",
        report.pending.len().yellow(),
        pct(report.pending.len())
    )?;
    writeln!(
        out,
        "  Source missing: {} ({:.1}%)",
        report.source_missing.len().red(),
        pct(report.source_missing.len())
    )?;
    if !report.pending_by_year.is_empty() {
        writeln!(out, "  Pending by year:")?;
        for (year, count) in report.pending_by_year.iter().rev() {
            writeln!(out, "    {year}: {count}")?;
        }
    }
    Ok(())
}
