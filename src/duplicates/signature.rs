//! Per-archive content signatures and archive-level redundancy.
//!
//! An [`ArchiveSignature`] is a BLAKE3 digest over the sorted `size_crc`
//! keys of an archive's entries. Sorting makes it independent of entry
//! order; duplicates inside one archive are kept, so it describes the
//! multiset of contents. The value is stable across processes and can be
//! stored or compared between runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::groups::ArchiveGroups;
use crate::scanner::{ArchiveEntry, ContentKey};

/// Order-independent digest of an archive's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveSignature(blake3::Hash);

impl ArchiveSignature {
    /// Compute the signature of a set of content keys.
    #[must_use]
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a ContentKey>) -> Self {
        let mut sorted: Vec<&str> = keys.into_iter().map(ContentKey::as_str).collect();
        sorted.sort_unstable();

        let mut hasher = blake3::Hasher::new();
        for key in sorted {
            hasher.update(key.as_bytes());
            hasher.update(b"\n");
        }
        Self(hasher.finalize())
    }

    /// Signature of a list of entries, keyed by `size_crc`.
    #[must_use]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ArchiveEntry>) -> Self {
        let keys: Vec<ContentKey> = entries.into_iter().map(ArchiveEntry::content_key).collect();
        Self::from_keys(&keys)
    }

    /// Hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Display for ArchiveSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

impl Serialize for ArchiveSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.to_hex().as_str())
    }
}

/// Per-archive view of a grouping result.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    /// Archive path
    pub path: PathBuf,
    /// Number of entries
    pub entries: usize,
    /// Uncompressed bytes
    pub total_size: u64,
    /// Entries whose content also exists elsewhere in the export set
    pub duplicate_entries: usize,
    /// Content signature
    pub signature: ArchiveSignature,
}

impl ArchiveSummary {
    /// Percentage of entries that are duplicated elsewhere.
    #[must_use]
    pub fn duplicate_pct(&self) -> f64 {
        if self.entries == 0 {
            0.0
        } else {
            self.duplicate_entries as f64 / self.entries as f64 * 100.0
        }
    }

    /// Whether every entry exists elsewhere, so the archive can go.
    #[must_use]
    pub fn is_redundant(&self) -> bool {
        self.entries > 0 && self.duplicate_entries == self.entries
    }
}

/// Summarize each archive, sorted by path.
#[must_use]
pub fn summarize_archives(groups: &ArchiveGroups) -> Vec<ArchiveSummary> {
    let mut per_archive: BTreeMap<PathBuf, (Vec<&ArchiveEntry>, usize)> = BTreeMap::new();
    let mut duplicated: HashSet<(&PathBuf, usize, &str)> = HashSet::new();

    for group in groups.iter() {
        if group.is_duplicate() {
            for entry in &group.entries {
                duplicated.insert((&entry.archive_path, entry.index, entry.entry_path.as_str()));
            }
        }
        for entry in &group.entries {
            per_archive
                .entry(entry.archive_path.clone())
                .or_default()
                .0
                .push(entry);
        }
    }

    for (path, (entries, dup_count)) in &mut per_archive {
        *dup_count = entries
            .iter()
            .filter(|e| duplicated.contains(&(path, e.index, e.entry_path.as_str())))
            .count();
    }

    per_archive
        .into_iter()
        .map(|(path, (entries, duplicate_entries))| ArchiveSummary {
            signature: ArchiveSignature::from_entries(entries.iter().copied()),
            entries: entries.len(),
            total_size: entries.iter().map(|e| e.size).sum(),
            duplicate_entries,
            path,
        })
        .collect()
}

/// Groups of archives with identical content (2+ archives each).
#[must_use]
pub fn identical_archives(summaries: &[ArchiveSummary]) -> Vec<Vec<PathBuf>> {
    let mut by_signature: HashMap<ArchiveSignature, Vec<PathBuf>> = HashMap::new();
    for summary in summaries.iter().filter(|s| s.entries > 0) {
        by_signature
            .entry(summary.signature)
            .or_default()
            .push(summary.path.clone());
    }
    let mut groups: Vec<Vec<PathBuf>> = by_signature
        .into_values()
        .filter(|paths| paths.len() > 1)
        .collect();
    groups.sort();
    groups
}
