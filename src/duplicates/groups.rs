//! Two-phase duplicate grouping of archive entries.
//!
//! # Overview
//!
//! Grouping never reads entry content. It runs in two phases:
//!
//! 1. **Name partition.** Entries are partitioned by `(size, normalized
//!    file name)`. Normalization drops archive-export duplicate suffixes such
//!    as `(1)` right before the extension and lowercases the name, so
//!    `IMG_1234(1).jpg` and `IMG_1234.JPG` land together. A partition with a
//!    single member is certainly unique and gets a synthetic key.
//! 2. **Checksum grouping.** Members of larger partitions are grouped by
//!    their `size_crc` key, built from the CRC-32 already stored in the
//!    archive metadata.
//!
//! An entry alone in its name partition is never compared by checksum, so
//! identical content stored under an unrelated name stays in its own group.
//! Partitions of two or more that share a key merge into one group.
//!
//! Groups and their members keep input order, so the first member of a
//! group is the canonical original: with archives listed in sorted path
//! order, that is the earliest occurrence across the whole export set.
//!
//! # Example
//!
//! ```
//! use takeout_dedupe::duplicates::group_entries;
//! use takeout_dedupe::scanner::ArchiveEntry;
//!
//! let entries = vec![
//!     ArchiveEntry::new("t1.zip", "a.jpg", 100, 0xAAAA),
//!     ArchiveEntry::new("t1.zip", "a(1).jpg", 100, 0xAAAA),
//!     ArchiveEntry::new("t1.zip", "b.png", 50, 0xBBBB),
//! ];
//! let (groups, stats) = group_entries(entries);
//! assert_eq!(groups.len(), 2);
//! assert_eq!(groups.duplicate_count(), 1);
//! assert_eq!(stats.unique_by_name, 1);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::scanner::{ArchiveEntry, ContentKey};

/// One or more trailing `(N)` markers, e.g. `(1)` or `(1)(2)`.
static DUPLICATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\(\d+\))+$").expect("duplicate suffix pattern is valid"));

/// Prefix of synthetic keys given to entries that are unique by name.
pub const SYNTHETIC_KEY_PREFIX: &str = "__unique_";

/// Normalize an entry path for phase-1 partitioning.
///
/// Keeps only the file name, strips every `(N)` marker sitting right before
/// the extension (or at the end when there is none) and lowercases.
///
/// ```
/// use takeout_dedupe::duplicates::normalize_filename;
///
/// assert_eq!(normalize_filename("Takeout/Photos/IMG_1234(1).jpg"), "img_1234.jpg");
/// assert_eq!(normalize_filename("video(1)(2).mp4"), "video.mp4");
/// assert_eq!(normalize_filename("notes(3)"), "notes");
/// assert_eq!(normalize_filename("report (final).pdf"), "report (final).pdf");
/// ```
#[must_use]
pub fn normalize_filename(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() => name.split_at(dot),
        _ => (name, ""),
    };

    let stem = DUPLICATE_SUFFIX.replace(stem, "");

    format!("{}{}", stem, ext).to_lowercase()
}

/// Whether `key` is a synthetic key for a name-unique entry.
#[must_use]
pub fn is_synthetic_key(key: &ContentKey) -> bool {
    key.as_str().starts_with(SYNTHETIC_KEY_PREFIX)
}

/// A set of archive entries sharing one content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryGroup {
    /// `size_crc` key, or a synthetic key for name-unique entries
    pub key: ContentKey,
    /// Members in input order; the first is the canonical original
    pub entries: Vec<ArchiveEntry>,
}

impl EntryGroup {
    /// The canonical original.
    #[must_use]
    pub fn canonical(&self) -> Option<&ArchiveEntry> {
        self.entries.first()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the group holds at least one redundant copy.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.entries.len() > 1
    }

    /// Number of redundant copies (members minus the original).
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    /// Bytes taken by the redundant copies.
    #[must_use]
    pub fn wasted_size(&self) -> u64 {
        self.entries.iter().skip(1).map(|e| e.size).sum()
    }

    /// Whether this group was keyed without a checksum comparison.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        is_synthetic_key(&self.key)
    }
}

/// Output of [`group_entries`]: groups in first-seen order plus a key index.
#[derive(Debug, Clone, Default)]
pub struct ArchiveGroups {
    groups: Vec<EntryGroup>,
    index: HashMap<ContentKey, usize>,
}

impl ArchiveGroups {
    /// Group for `key`.
    #[must_use]
    pub fn get(&self, key: &ContentKey) -> Option<&EntryGroup> {
        self.index.get(key).map(|&i| &self.groups[i])
    }

    /// All groups in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &EntryGroup> {
        self.groups.iter()
    }

    /// Groups with at least one redundant copy.
    pub fn duplicates(&self) -> impl Iterator<Item = &EntryGroup> {
        self.groups.iter().filter(|g| g.is_duplicate())
    }

    /// Canonical originals, one per group, in first-seen order.
    pub fn canonical_entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.groups.iter().filter_map(EntryGroup::canonical)
    }

    /// Number of groups (distinct contents).
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total redundant copies across all groups.
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(EntryGroup::duplicate_count).sum()
    }

    /// Total bytes taken by redundant copies.
    #[must_use]
    pub fn wasted_size(&self) -> u64 {
        self.groups.iter().map(EntryGroup::wasted_size).sum()
    }

    /// Consume into the group list.
    #[must_use]
    pub fn into_groups(self) -> Vec<EntryGroup> {
        self.groups
    }

    fn push(&mut self, key: ContentKey, entry: ArchiveEntry) {
        match self.index.get(&key) {
            Some(&i) => self.groups[i].entries.push(entry),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push(EntryGroup {
                    key,
                    entries: vec![entry],
                });
            }
        }
    }
}

/// Statistics from the grouping phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupingStats {
    /// Entries processed
    pub total_entries: usize,
    /// Uncompressed bytes across all entries
    pub total_size: u64,
    /// Entries settled as unique by phase 1 alone
    pub unique_by_name: usize,
    /// Entries that needed a checksum comparison
    pub checked_by_checksum: usize,
    /// Distinct contents (groups)
    pub groups: usize,
    /// Groups with 2+ members
    pub duplicate_groups: usize,
    /// Redundant copies
    pub duplicates: usize,
    /// Bytes taken by redundant copies
    pub wasted_size: u64,
}

impl GroupingStats {
    /// Percentage of entries settled without looking at checksums.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_entries == 0 {
            0.0
        } else {
            (self.unique_by_name as f64 / self.total_entries as f64) * 100.0
        }
    }
}

/// Group archive entries by content (two-phase, no I/O).
#[must_use]
pub fn group_entries(
    entries: impl IntoIterator<Item = ArchiveEntry>,
) -> (ArchiveGroups, GroupingStats) {
    let entries: Vec<ArchiveEntry> = entries.into_iter().collect();
    let mut stats = GroupingStats {
        total_entries: entries.len(),
        total_size: entries.iter().map(|e| e.size).sum(),
        ..Default::default()
    };

    // Phase 1: partition sizes by (size, normalized name).
    let names: Vec<String> = entries
        .iter()
        .map(|e| normalize_filename(&e.entry_path))
        .collect();
    let mut partition_sizes: HashMap<(u64, &str), usize> = HashMap::new();
    for (entry, name) in entries.iter().zip(&names) {
        *partition_sizes.entry((entry.size, name.as_str())).or_insert(0) += 1;
    }
    let singleton: Vec<bool> = entries
        .iter()
        .zip(&names)
        .map(|(entry, name)| partition_sizes.get(&(entry.size, name.as_str())) == Some(&1))
        .collect();
    drop(partition_sizes);

    // Phase 2: assign keys in input order.
    let mut groups = ArchiveGroups::default();
    for (entry, is_singleton) in entries.into_iter().zip(singleton) {
        let key = if is_singleton {
            let key = ContentKey::from_raw(format!(
                "{}{}_{}",
                SYNTHETIC_KEY_PREFIX, stats.unique_by_name, entry.size
            ));
            stats.unique_by_name += 1;
            log::trace!("Unique by name: {}", entry.display_path());
            key
        } else {
            stats.checked_by_checksum += 1;
            entry.content_key()
        };
        groups.push(key, entry);
    }

    stats.groups = groups.len();
    stats.duplicate_groups = groups.duplicates().count();
    stats.duplicates = groups.duplicate_count();
    stats.wasted_size = groups.wasted_size();

    log::info!(
        "Grouping complete: {} entries -> {} distinct, {} duplicates ({:.1}% settled by name)",
        stats.total_entries,
        stats.groups,
        stats.duplicates,
        stats.elimination_rate()
    );

    (groups, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(archive: &str, path: &str, size: u64, crc: u32) -> ArchiveEntry {
        ArchiveEntry::new(archive, path, size, crc)
    }

    #[test]
    fn test_normalize_strips_suffix_before_extension() {
        assert_eq!(normalize_filename("IMG_1234(1).jpg"), "img_1234.jpg");
        assert_eq!(normalize_filename("IMG_1234(12).JPG"), "img_1234.jpg");
        assert_eq!(normalize_filename("IMG_1234.jpg"), "img_1234.jpg");
    }

    #[test]
    fn test_suffix_pattern_matches_only_trailing_markers() {
        assert!(DUPLICATE_SUFFIX.is_match("IMG_0001(1)(2)"));
        assert!(!DUPLICATE_SUFFIX.is_match("IMG_(1)_0001"));
        assert!(!DUPLICATE_SUFFIX.is_match("report (final)"));
    }

    #[test]
    fn test_normalize_repeated_suffixes() {
        assert_eq!(normalize_filename("video(1)(2).mp4"), "video.mp4");
    }

    #[test]
    fn test_normalize_without_extension() {
        assert_eq!(normalize_filename("README(2)"), "readme");
    }

    #[test]
    fn test_normalize_keeps_inner_parentheses() {
        assert_eq!(normalize_filename("a(1)b.jpg"), "a(1)b.jpg");
        assert_eq!(normalize_filename("copy (x).jpg"), "copy (x).jpg");
    }

    #[test]
    fn test_normalize_uses_file_name_only() {
        assert_eq!(normalize_filename("Photos(1)/dir/pic(3).png"), "pic.png");
        assert_eq!(normalize_filename("dir\\pic(3).png"), "pic.png");
    }

    #[test]
    fn test_normalize_only_last_extension() {
        assert_eq!(normalize_filename("backup.tar(1).gz"), "backup.tar.gz");
    }

    #[test]
    fn test_concrete_scenario() {
        let (groups, stats) = group_entries(vec![
            entry("t.zip", "a.jpg", 100, 0xAAAA),
            entry("t.zip", "a(1).jpg", 100, 0xAAAA),
            entry("t.zip", "b.png", 50, 0xBBBB),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups.duplicate_count(), 1);

        let dup = groups.duplicates().next().unwrap();
        assert_eq!(dup.key.as_str(), "100_0000aaaa");
        assert_eq!(dup.canonical().unwrap().entry_path, "a.jpg");
        assert_eq!(dup.entries[1].entry_path, "a(1).jpg");

        let unique: Vec<_> = groups.iter().filter(|g| !g.is_duplicate()).collect();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].entries[0].entry_path, "b.png");
        assert!(unique[0].is_synthetic());

        assert_eq!(stats.unique_by_name, 1);
        assert_eq!(stats.checked_by_checksum, 2);
        assert_eq!(stats.wasted_size, 100);
    }

    #[test]
    fn test_same_name_different_crc_are_separate() {
        let (groups, _) = group_entries(vec![
            entry("t1.zip", "a.jpg", 100, 1),
            entry("t2.zip", "a.jpg", 100, 2),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.duplicate_count(), 0);
        assert!(groups.iter().all(|g| !g.is_synthetic()));
    }

    #[test]
    fn test_canonical_is_first_in_input_order() {
        let (groups, _) = group_entries(vec![
            entry("t1.zip", "x/a(2).jpg", 10, 7),
            entry("t2.zip", "a.jpg", 10, 7),
            entry("t3.zip", "a(1).jpg", 10, 7),
        ]);
        let group = groups.get(&ContentKey::from_crc(10, 7)).unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(group.canonical().unwrap().archive_path.to_str(), Some("t1.zip"));
    }

    #[test]
    fn test_partitions_merge_on_equal_key() {
        // Two name partitions with the same content collapse into one group.
        let (groups, _) = group_entries(vec![
            entry("t.zip", "a.jpg", 10, 7),
            entry("t.zip", "b.jpg", 10, 7),
            entry("t.zip", "a(1).jpg", 10, 7),
            entry("t.zip", "b(1).jpg", 10, 7),
        ]);
        assert_eq!(groups.len(), 1);
        let paths: Vec<_> = groups
            .iter()
            .next()
            .unwrap()
            .entries
            .iter()
            .map(|e| e.entry_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.jpg", "b.jpg", "a(1).jpg", "b(1).jpg"]);
    }

    #[test]
    fn test_synthetic_keys_are_distinct() {
        let (groups, stats) = group_entries(vec![
            entry("t.zip", "a.jpg", 10, 1),
            entry("t.zip", "b.jpg", 10, 1),
            entry("t.zip", "c.jpg", 10, 1),
        ]);
        // Different names: never compared, even with equal CRCs.
        assert_eq!(groups.len(), 3);
        assert_eq!(stats.unique_by_name, 3);
        let keys: Vec<_> = groups.iter().map(|g| g.key.as_str().to_string()).collect();
        assert_eq!(keys, vec!["__unique_0_10", "__unique_1_10", "__unique_2_10"]);
    }

    #[test]
    fn test_empty_input() {
        let (groups, stats) = group_entries(Vec::new());
        assert!(groups.is_empty());
        assert_eq!(stats, GroupingStats::default());
        assert!((stats.elimination_rate() - 0.0).abs() < f64::EPSILON);
    }
}
