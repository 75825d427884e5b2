//! Progress reporting over a channel.
//!
//! Hashing workers never touch shared counters or terminal state. They send
//! [`ProgressEvent`]s through a [`ProgressReporter`] (a cheap, cloneable
//! sender) and a single aggregator thread owns every counter and every
//! `indicatif` bar.
//!
//! # Example
//!
//! ```
//! use takeout_dedupe::progress::{Phase, Progress};
//!
//! let (reporter, progress) = Progress::spawn(true);
//! reporter.phase_start(Phase::Hash, 2);
//! reporter.item(Phase::Hash, 10);
//! reporter.item(Phase::Hash, 20);
//! reporter.phase_end(Phase::Hash);
//! let totals = progress.finish();
//! assert_eq!(totals.get(Phase::Hash).items, 2);
//! assert_eq!(totals.get(Phase::Hash).bytes, 30);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};

/// Pipeline phase a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Listing archive central directories
    Archives,
    /// Stat-only walk of a destination tree
    Walk,
    /// Computing content keys for files
    Hash,
    /// Resolving entry dates
    Dates,
    /// Classifying canonical entries against the destination
    Plan,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Self::Archives => "Reading archives",
            Self::Walk => "Walking directory",
            Self::Hash => "Hashing files",
            Self::Dates => "Resolving dates",
            Self::Plan => "Checking candidates",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Message sent from workers to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A phase begins; `total` of 0 means unknown (spinner).
    PhaseStart {
        /// Phase
        phase: Phase,
        /// Expected number of items
        total: u64,
    },
    /// One item of a phase finished.
    Item {
        /// Phase
        phase: Phase,
        /// Bytes accounted to this item
        bytes: u64,
    },
    /// Replace the message shown next to the active bar.
    Message(String),
    /// A phase finished.
    PhaseEnd {
        /// Phase
        phase: Phase,
    },
    /// Stop the aggregator.
    Shutdown,
}

/// Counters kept per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTotals {
    /// Items completed
    pub items: u64,
    /// Bytes accounted
    pub bytes: u64,
}

/// Final counters returned by [`Progress::finish`].
#[derive(Debug, Clone, Default)]
pub struct ProgressTotals {
    phases: HashMap<Phase, PhaseTotals>,
}

impl ProgressTotals {
    /// Counters for one phase (zero if the phase never reported).
    #[must_use]
    pub fn get(&self, phase: Phase) -> PhaseTotals {
        self.phases.get(&phase).copied().unwrap_or_default()
    }
}

/// Sending half handed to workers. Clone freely.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<Sender<ProgressEvent>>,
}

impl ProgressReporter {
    /// A reporter that drops every event.
    #[must_use]
    pub fn silent() -> Self {
        Self { tx: None }
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // The aggregator may already be gone during shutdown.
            let _ = tx.send(event);
        }
    }

    /// Announce the start of a phase.
    pub fn phase_start(&self, phase: Phase, total: u64) {
        self.send(ProgressEvent::PhaseStart { phase, total });
    }

    /// Record one completed item.
    pub fn item(&self, phase: Phase, bytes: u64) {
        self.send(ProgressEvent::Item { phase, bytes });
    }

    /// Update the status message.
    pub fn message(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Message(message.into()));
    }

    /// Announce the end of a phase.
    pub fn phase_end(&self, phase: Phase) {
        self.send(ProgressEvent::PhaseEnd { phase });
    }
}

/// Handle to the aggregator thread.
#[derive(Debug)]
pub struct Progress {
    tx: Sender<ProgressEvent>,
    handle: Option<JoinHandle<ProgressTotals>>,
}

impl Progress {
    /// Start the aggregator. With `quiet`, counters are kept but no bars
    /// are drawn.
    #[must_use]
    pub fn spawn(quiet: bool) -> (ProgressReporter, Self) {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("progress".to_string())
            .spawn(move || Aggregator::new(quiet).run(&rx))
            .map_err(|e| log::warn!("Progress display unavailable: {}", e))
            .ok();
        Self::with_aggregator(tx, handle)
    }

    /// Pair a sender with its aggregator. Without a running aggregator the
    /// reporter is silent, so nothing queues on an undrained channel.
    fn with_aggregator(
        tx: Sender<ProgressEvent>,
        handle: Option<JoinHandle<ProgressTotals>>,
    ) -> (ProgressReporter, Self) {
        let reporter = ProgressReporter {
            tx: handle.as_ref().map(|_| tx.clone()),
        };
        (reporter, Self { tx, handle })
    }

    /// Stop the aggregator and return its counters.
    #[must_use]
    pub fn finish(mut self) -> ProgressTotals {
        let _ = self.tx.send(ProgressEvent::Shutdown);
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(ProgressEvent::Shutdown);
            let _ = handle.join();
        }
    }
}

struct Aggregator {
    quiet: bool,
    bar: Option<ProgressBar>,
    totals: ProgressTotals,
}

impl Aggregator {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: None,
            totals: ProgressTotals::default(),
        }
    }

    fn run(mut self, rx: &Receiver<ProgressEvent>) -> ProgressTotals {
        while let Ok(event) = rx.recv() {
            match event {
                ProgressEvent::PhaseStart { phase, total } => self.start(phase, total),
                ProgressEvent::Item { phase, bytes } => {
                    let entry = self.totals.phases.entry(phase).or_default();
                    entry.items += 1;
                    entry.bytes += bytes;
                    if let Some(bar) = &self.bar {
                        bar.inc(1);
                    }
                }
                ProgressEvent::Message(message) => {
                    if let Some(bar) = &self.bar {
                        bar.set_message(message);
                    }
                }
                ProgressEvent::PhaseEnd { phase } => {
                    if let Some(bar) = self.bar.take() {
                        bar.finish_and_clear();
                    }
                    log::debug!("{} done: {} items", phase, self.totals.get(phase).items);
                }
                ProgressEvent::Shutdown => break,
            }
        }
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.totals
    }

    fn start(&mut self, phase: Phase, total: u64) {
        self.totals.phases.entry(phase).or_default();
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        if self.quiet {
            return;
        }

        let bar = if total == 0 {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} {prefix} [{elapsed_precise}] {pos} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::with_template(
                    "{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█>-"),
            );
            pb
        };
        bar.set_prefix(phase.label());
        self.bar = Some(bar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_reporter_is_noop() {
        let reporter = ProgressReporter::silent();
        reporter.phase_start(Phase::Hash, 10);
        reporter.item(Phase::Hash, 1);
        reporter.phase_end(Phase::Hash);
    }

    #[test]
    fn test_aggregator_counts_from_many_threads() {
        let (reporter, progress) = Progress::spawn(true);
        reporter.phase_start(Phase::Hash, 400);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = reporter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        r.item(Phase::Hash, 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        reporter.phase_end(Phase::Hash);

        let totals = progress.finish();
        assert_eq!(totals.get(Phase::Hash), PhaseTotals { items: 400, bytes: 800 });
        assert_eq!(totals.get(Phase::Walk), PhaseTotals::default());
    }

    #[test]
    fn test_no_aggregator_means_silent_reporter() {
        let (tx, rx) = unbounded();
        let (reporter, progress) = Progress::with_aggregator(tx, None);
        reporter.phase_start(Phase::Hash, 3);
        for _ in 0..3 {
            reporter.clone().item(Phase::Hash, 10);
        }
        assert!(rx.is_empty());
        assert_eq!(progress.finish().get(Phase::Hash), PhaseTotals::default());
    }

    #[test]
    fn test_reporter_survives_finished_aggregator() {
        let (reporter, progress) = Progress::spawn(true);
        let _ = progress.finish();
        reporter.item(Phase::Walk, 1);
    }
}
