//! Extraction planning: which canonical entries still need extracting.
//!
//! # Overview
//!
//! For every duplicate group only the canonical original is considered.
//! Each is classified against a [`DestinationSnapshot`]:
//!
//! 1. No destination file has the entry's size: it is **to extract**, with
//!    no archive read.
//! 2. Otherwise its key is computed under the destination's strategy. For
//!    `size_crc` this uses archive metadata; other strategies stream the
//!    entry once. Archives are read in parallel, one worker per archive,
//!    and results are put back in input order.
//! 3. A key present in the snapshot is **already present**; anything else,
//!    including entries that fail to read, is to extract.
//!
//! Every planned file carries a proposed location derived from its date.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;

use super::destination::DestinationSnapshot;
use crate::dates::{propose_location, ResolvedDates};
use crate::duplicates::ArchiveGroups;
use crate::error::ErrorSummary;
use crate::progress::{Phase, ProgressReporter};
use crate::scanner::directory::{with_pool, DEFAULT_IO_THREADS};
use crate::scanner::{ArchiveEntry, ArchiveError, ArchiveReader, ContentKey, Fingerprinter, Strategy};

/// Classification of one planned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Content not found in the destination
    ToExtract,
    /// Content already exists in the destination
    AlreadyPresent,
}

/// One canonical entry with its classification.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    /// The canonical archive entry
    pub entry: ArchiveEntry,
    /// Grouping key of its duplicate group
    pub group_key: ContentKey,
    /// Redundant copies of this content across the export set
    pub duplicate_count: usize,
    /// Resolved date, if any
    pub date: Option<chrono::NaiveDateTime>,
    /// Suggested path relative to the destination
    pub proposed_location: String,
    /// Classification
    pub status: PlanStatus,
    /// Destination file holding the same content
    pub existing: Option<PathBuf>,
}

/// Outcome of [`Planner::plan`].
#[derive(Debug, Clone, Default)]
pub struct ExtractionPlan {
    /// Entries to extract, in group order
    pub to_extract: Vec<PlannedFile>,
    /// Entries whose content the destination already holds
    pub already_present: Vec<PlannedFile>,
    /// Archives that could not be opened; their entries fail open
    pub unreadable_archives: Vec<(PathBuf, String)>,
    /// Per-entry failures
    pub errors: ErrorSummary,
    /// Entries that needed an archive read
    pub keyed_from_content: usize,
    /// Whether a shutdown request cut planning short
    pub interrupted: bool,
}

impl ExtractionPlan {
    /// Bytes that still need extracting.
    #[must_use]
    pub fn extract_size(&self) -> u64 {
        self.to_extract.iter().map(|f| f.entry.size).sum()
    }

    /// Bytes skipped because the destination has them.
    #[must_use]
    pub fn present_size(&self) -> u64 {
        self.already_present.iter().map(|f| f.entry.size).sum()
    }

    /// Whether nothing is left to extract.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.to_extract.is_empty()
    }
}

type KeyResult = Result<ContentKey, ArchiveError>;

/// Classifies canonical entries against a destination snapshot.
#[derive(Debug, Clone)]
pub struct Planner {
    fingerprinter: Fingerprinter,
    io_threads: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: ProgressReporter,
}

impl Planner {
    /// Create a planner keying entries with `strategy`.
    ///
    /// Must be the strategy the destination snapshot was built with.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(strategy),
            io_threads: DEFAULT_IO_THREADS,
            shutdown_flag: None,
            progress: ProgressReporter::silent(),
        }
    }

    /// Number of archives read concurrently.
    #[must_use]
    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads.max(1);
        self
    }

    /// Stop between archives when the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.fingerprinter = self.fingerprinter.with_shutdown_flag(Arc::clone(&flag));
        self.shutdown_flag = Some(flag);
        self
    }

    /// Send progress events to an aggregator.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Key the given entries of one archive, in order.
    ///
    /// Fails as a whole when the archive cannot be opened.
    fn key_archive(
        &self,
        archive: &Path,
        entries: &[(usize, &ArchiveEntry)],
    ) -> Result<Vec<(usize, KeyResult)>, ArchiveError> {
        if self.is_shutdown_requested() {
            return Err(ArchiveError::Interrupted(archive.to_path_buf()));
        }
        let mut reader = ArchiveReader::open(archive)?;
        Ok(entries
            .iter()
            .map(|&(slot, entry)| {
                let key = reader.key_for(entry, &self.fingerprinter);
                self.progress.item(Phase::Plan, entry.size);
                (slot, key)
            })
            .collect())
    }

    /// Classify the canonical entry of every group in `groups`.
    #[must_use]
    pub fn plan(
        &self,
        groups: &ArchiveGroups,
        destination: &DestinationSnapshot,
        dates: &ResolvedDates,
    ) -> ExtractionPlan {
        let candidates: Vec<(&ArchiveEntry, &ContentKey, usize)> = groups
            .iter()
            .filter_map(|g| g.canonical().map(|c| (c, &g.key, g.duplicate_count())))
            .collect();

        // Slots whose size matches something in the destination, by archive.
        let mut by_archive: BTreeMap<&Path, Vec<(usize, &ArchiveEntry)>> = BTreeMap::new();
        let mut keys: Vec<Option<KeyResult>> = Vec::with_capacity(candidates.len());
        for (slot, (entry, _, _)) in candidates.iter().enumerate() {
            if !destination.has_size(entry.size) {
                keys.push(None);
            } else if self.fingerprinter.strategy().is_metadata_only_for_archives() {
                keys.push(Some(Ok(entry.content_key())));
            } else {
                keys.push(None);
                by_archive
                    .entry(entry.archive_path.as_path())
                    .or_default()
                    .push((slot, *entry));
            }
        }

        let work: Vec<(&Path, Vec<(usize, &ArchiveEntry)>)> = by_archive.into_iter().collect();
        let total: usize = work.iter().map(|(_, e)| e.len()).sum();
        self.progress.phase_start(Phase::Plan, total as u64);
        let results: Vec<Result<Vec<(usize, KeyResult)>, ArchiveError>> =
            with_pool(self.io_threads, || {
                work.par_iter()
                    .map(|(archive, entries)| self.key_archive(archive, entries))
                    .collect()
            });
        self.progress.phase_end(Phase::Plan);

        let mut plan = ExtractionPlan {
            keyed_from_content: total,
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(keyed) => {
                    for (slot, key) in keyed {
                        keys[slot] = Some(key);
                    }
                }
                Err(ArchiveError::Interrupted(_)) => plan.interrupted = true,
                // Fail open: every entry of the archive stays to extract.
                Err(e) => {
                    log::warn!("{}", e);
                    if let ArchiveError::Open { path, .. } | ArchiveError::Zip { path, .. } = &e {
                        plan.unreadable_archives.push((path.clone(), e.to_string()));
                    }
                    plan.errors.record(e.kind(), &e);
                }
            }
        }
        for ((entry, group_key, duplicate_count), key) in candidates.into_iter().zip(keys) {
            let date = dates.get(entry);
            let mut planned = PlannedFile {
                entry: entry.clone(),
                group_key: group_key.clone(),
                duplicate_count,
                date,
                proposed_location: propose_location(entry.file_name(), date),
                status: PlanStatus::ToExtract,
                existing: None,
            };

            match key {
                Some(Ok(key)) => {
                    if let Some(existing) = destination.index().first(&key) {
                        planned.status = PlanStatus::AlreadyPresent;
                        planned.existing = Some(existing.path.clone());
                    }
                }
                Some(Err(ArchiveError::Interrupted(_))) => plan.interrupted = true,
                Some(Err(e)) => {
                    log::warn!("{}", e);
                    plan.errors.record(e.kind(), &e);
                }
                None => {}
            }

            log::trace!("{:?}: {}", planned.status, entry.display_path());
            match planned.status {
                PlanStatus::ToExtract => plan.to_extract.push(planned),
                PlanStatus::AlreadyPresent => plan.already_present.push(planned),
            }
        }

        plan.errors.log("Planning");
        log::info!(
            "Plan: {} to extract, {} already present ({} read from archives)",
            plan.to_extract.len(),
            plan.already_present.len(),
            plan.keyed_from_content
        );
        plan
    }
}
