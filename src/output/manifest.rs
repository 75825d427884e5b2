//! Manifest of unique archive files.
//!
//! `analyze` (and `plan --manifest`) write one record per distinct content:
//! its canonical entry, where it came from and where it should land. A later
//! `reconcile` run reads the manifest back and checks each record against a
//! destination tree without touching the archives again.
//!
//! # Schema
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "generated": "2024-03-01T10:00:00Z",
//!   "strategy": "size_crc",
//!   "total_unique_files": 1,
//!   "files": [
//!     {
//!       "content_key": "1024_0000beef",
//!       "group_key": "1024_0000beef",
//!       "file_size": 1024,
//!       "file_crc": 48879,
//!       "date": "2019-07-04T12:00:00",
//!       "proposed_location": "2019/07/IMG_0001.jpg",
//!       "source_zip": "/exports/takeout-001.zip",
//!       "source_path": "Takeout/Google Photos/IMG_0001.jpg",
//!       "duplicate_count": 2
//!     }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::{propose_location, ResolvedDates, UNDATED_DIR};
use crate::duplicates::ArchiveGroups;
use crate::reconcile::{DestinationSnapshot, ExtractionPlan, PlannedFile};
use crate::scanner::{ArchiveEntry, ContentKey, Strategy};

/// Manifest format version written by this build.
pub const MANIFEST_VERSION: &str = "1.0";

/// Errors reading or writing a manifest.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The file could not be opened, created or written.
    #[error("Manifest I/O error on {path}: {source}")]
    Io {
        /// Manifest path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid manifest document.
    #[error("Invalid manifest {path}: {source}")]
    Parse {
        /// Manifest path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The document was written by an incompatible version.
    #[error("Unsupported manifest version '{found}' (expected {MANIFEST_VERSION})")]
    UnsupportedVersion {
        /// Version found in the file
        found: String,
    },
}

/// One unique file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Metadata key of the canonical entry (`size_crc`)
    pub content_key: ContentKey,
    /// Key the duplicate group was formed under
    pub group_key: ContentKey,
    /// Uncompressed size in bytes
    pub file_size: u64,
    /// CRC-32 from the archive's central directory
    pub file_crc: u32,
    /// Resolved date, if any
    pub date: Option<NaiveDateTime>,
    /// Destination path relative to the output root
    pub proposed_location: String,
    /// Archive holding the canonical entry
    pub source_zip: PathBuf,
    /// Path of the canonical entry inside the archive
    pub source_path: String,
    /// Redundant copies found elsewhere in the archive set
    pub duplicate_count: usize,
}

impl ManifestFile {
    fn from_entry(
        entry: &ArchiveEntry,
        group_key: &ContentKey,
        duplicate_count: usize,
        date: Option<NaiveDateTime>,
        proposed_location: String,
    ) -> Self {
        Self {
            content_key: entry.content_key(),
            group_key: group_key.clone(),
            file_size: entry.size,
            file_crc: entry.crc32,
            date,
            proposed_location,
            source_zip: entry.archive_path.clone(),
            source_path: entry.entry_path.clone(),
            duplicate_count,
        }
    }

    fn from_planned(planned: &PlannedFile) -> Self {
        Self::from_entry(
            &planned.entry,
            &planned.group_key,
            planned.duplicate_count,
            planned.date,
            planned.proposed_location.clone(),
        )
    }

    /// Year bucket used when summarizing pending work.
    #[must_use]
    pub fn year(&self) -> String {
        self.date
            .map_or_else(|| UNDATED_DIR.to_string(), |d| d.year().to_string())
    }
}

/// Manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version
    pub version: String,
    /// Creation time
    pub generated: DateTime<Utc>,
    /// Strategy the `content_key` values were computed with
    pub strategy: Strategy,
    /// Number of records in `files`
    pub total_unique_files: usize,
    /// One record per distinct content
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    fn with_files(files: Vec<ManifestFile>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            generated: Utc::now(),
            strategy: Strategy::SizeCrc,
            total_unique_files: files.len(),
            files,
        }
    }

    /// Canonical entry of every group.
    #[must_use]
    pub fn from_groups(groups: &ArchiveGroups, dates: &ResolvedDates) -> Self {
        let files = groups
            .iter()
            .filter_map(|group| {
                let entry = group.canonical()?;
                let date = dates.get(entry);
                Some(ManifestFile::from_entry(
                    entry,
                    &group.key,
                    group.duplicate_count(),
                    date,
                    propose_location(entry.file_name(), date),
                ))
            })
            .collect();
        Self::with_files(files)
    }

    /// Entries a plan still has to extract.
    #[must_use]
    pub fn from_plan(plan: &ExtractionPlan) -> Self {
        Self::with_files(plan.to_extract.iter().map(ManifestFile::from_planned).collect())
    }

    /// Write pretty-printed JSON to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be written.
    pub fn write_to_path(&self, path: &Path) -> Result<(), ManifestError> {
        let io_err = |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| {
            ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        log::info!(
            "Manifest: {} unique files written to {}",
            self.files.len(),
            path.display()
        );
        Ok(())
    }

    /// Read a manifest from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, malformed or of another
    /// format version.
    pub fn read_from_path(path: &Path) -> Result<Self, ManifestError> {
        let file = File::open(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: manifest.version,
            });
        }
        Ok(manifest)
    }

    /// Classify every record against a destination snapshot.
    ///
    /// A record is extracted when its key is present in the destination,
    /// pending when its source archive still exists, and source-missing
    /// otherwise.
    #[must_use]
    pub fn reconcile(&self, destination: &DestinationSnapshot) -> ManifestReconciliation {
        let mut result = ManifestReconciliation::default();
        for file in &self.files {
            if destination.has_size(file.file_size) && destination.contains(&file.content_key) {
                log::trace!("Extracted: {}", file.source_path);
                result.extracted.push(file.clone());
            } else if file.source_zip.exists() {
                result.pending.push(file.clone());
            } else {
                log::trace!("Source missing: {}", file.source_zip.display());
                result.source_missing.push(file.clone());
            }
        }
        log::info!(
            "Reconciled {} records: {} extracted, {} pending, {} source missing",
            self.files.len(),
            result.extracted.len(),
            result.pending.len(),
            result.source_missing.len()
        );
        result
    }
}

/// Manifest records split by destination state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestReconciliation {
    /// Already in the destination
    pub extracted: Vec<ManifestFile>,
    /// Not yet extracted; source archive available
    pub pending: Vec<ManifestFile>,
    /// Not yet extracted; source archive gone
    pub source_missing: Vec<ManifestFile>,
}

impl ManifestReconciliation {
    /// Number of classified records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.extracted.len() + self.pending.len() + self.source_missing.len()
    }

    /// Share of records already extracted, in percent.
    #[must_use]
    pub fn extracted_pct(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.extracted.len() as f64 / total as f64 * 100.0,
        }
    }

    /// Pending records per year (or `undated`).
    #[must_use]
    pub fn pending_by_year(&self) -> BTreeMap<String, usize> {
        let mut years = BTreeMap::new();
        for file in &self.pending {
            *years.entry(file.year()).or_insert(0) += 1;
        }
        years
    }

    /// Whether every record is in the destination.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.source_missing.is_empty()
    }
}
