use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

use proptest::prelude::*;
use takeout_dedupe::duplicates::{group_entries, is_synthetic_key, normalize_filename};
use takeout_dedupe::reconcile::compare;
use takeout_dedupe::scanner::Strategy as HashStrategy;
use takeout_dedupe::scanner::{
    build_index, ArchiveEntry, ContentKey, DirectoryEntry, Fingerprinter, WINDOW_SIZE,
};
use tempfile::TempDir;

const NAMES: &[&str] = &[
    "IMG_0001.jpg",
    "IMG_0001(1).jpg",
    "img_0001(2).JPG",
    "IMG_0002.jpg",
    "IMG_0002(1)(1).jpg",
    "notes",
    "notes(3)",
    "video.mp4",
];

fn archive_entries() -> impl Strategy<Value = Vec<ArchiveEntry>> {
    prop::collection::vec((0..NAMES.len(), 1u64..4, 0u32..3, 0usize..3), 0..40).prop_map(
        |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (name, size, crc, archive))| {
                    ArchiveEntry::new(
                        format!("takeout-{archive:03}.zip"),
                        format!("Takeout/{i}/{}", NAMES[name]),
                        size,
                        crc,
                    )
                    .with_index(i)
                })
                .collect()
        },
    )
}

/// Pseudo-random bytes; cheaper than generating each byte through proptest.
fn bytes_from_seed(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn any_strategy() -> impl Strategy<Value = HashStrategy> {
    prop_oneof![
        Just(HashStrategy::SizeCrc),
        Just(HashStrategy::SizePartial),
        Just(HashStrategy::Full),
    ]
}

proptest! {
    #[test]
    fn test_grouping_invariants(entries in archive_entries()) {
        let (groups, stats) = group_entries(entries.clone());

        // Every entry lands in exactly one group, order preserved.
        let flattened: Vec<&ArchiveEntry> = groups.iter().flat_map(|g| g.entries.iter()).collect();
        prop_assert_eq!(flattened.len(), entries.len());
        prop_assert_eq!(stats.total_entries, entries.len());
        prop_assert_eq!(stats.unique_by_name + stats.checked_by_checksum, entries.len());

        let mut group_of: HashMap<usize, usize> = HashMap::new();
        for (g, group) in groups.iter().enumerate() {
            prop_assert!(!group.entries.is_empty());
            let positions: Vec<usize> = group.entries.iter().map(|e| e.index).collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
            for entry in &group.entries {
                group_of.insert(entry.index, g);
                if !is_synthetic_key(&group.key) {
                    // Distinct keys are never merged.
                    prop_assert_eq!(&entry.content_key(), &group.key);
                }
            }
            if is_synthetic_key(&group.key) {
                prop_assert_eq!(group.entries.len(), 1);
            }
        }

        // Entries sharing size, normalized name and CRC share a group.
        for a in &entries {
            for b in &entries {
                if a.size == b.size
                    && a.crc32 == b.crc32
                    && normalize_filename(&a.entry_path) == normalize_filename(&b.entry_path)
                {
                    prop_assert_eq!(group_of[&a.index], group_of[&b.index]);
                }
            }
        }

        // Canonical entry is the earliest member.
        for group in groups.iter() {
            let first = group.entries.iter().map(|e| e.index).min();
            prop_assert_eq!(group.canonical().map(|e| e.index), first);
        }
    }

    #[test]
    fn test_unique_in_directory_is_set_difference(
        dir_keys in prop::collection::vec((1u64..5, 0u32..4), 0..30),
        zip_keys in prop::collection::vec((1u64..5, 0u32..4), 0..30),
    ) {
        let dir_entries: Vec<DirectoryEntry> = dir_keys
            .iter()
            .enumerate()
            .map(|(i, &(size, crc))| DirectoryEntry {
                path: PathBuf::from(format!("/dest/{i}.jpg")),
                size,
                mtime: 0.0,
                key: ContentKey::from_crc(size, crc),
            })
            .collect();
        let keyed: Vec<(ArchiveEntry, ContentKey)> = zip_keys
            .iter()
            .enumerate()
            .map(|(i, &(size, crc))| {
                let entry = ArchiveEntry::new("t.zip", format!("{i}.jpg"), size, crc);
                (entry, ContentKey::from_crc(size, crc))
            })
            .collect();

        let index = build_index(&dir_entries);
        let comparison = compare(keyed.clone(), &index);

        let dir_set: BTreeSet<ContentKey> = dir_entries.iter().map(|e| e.key.clone()).collect();
        let zip_set: BTreeSet<ContentKey> = keyed.iter().map(|(_, k)| k.clone()).collect();
        let expected: BTreeSet<ContentKey> = dir_set.difference(&zip_set).cloned().collect();
        let actual: BTreeSet<ContentKey> =
            comparison.unique_in_directory.iter().map(|e| e.key.clone()).collect();
        prop_assert_eq!(actual, expected);

        // Every directory file with an unmatched key is reported.
        let unmatched_files = dir_entries.iter().filter(|e| !zip_set.contains(&e.key)).count();
        prop_assert_eq!(comparison.unique_in_directory.len(), unmatched_files);

        prop_assert_eq!(comparison.archive_total(), keyed.len());
        for (entry, existing) in &comparison.duplicates {
            prop_assert_eq!(existing.key.clone(), entry.content_key());
        }
        for entry in &comparison.unique_in_archive {
            prop_assert!(!dir_set.contains(&entry.content_key()));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_file_stream_and_buffer_keys_agree(
        seed in any::<u64>(),
        len in 0..(3 * WINDOW_SIZE as usize + 17),
        strategy in any_strategy(),
    ) {
        let content = bytes_from_seed(seed, len);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, &content).unwrap();
        let size = content.len() as u64;

        let fp = Fingerprinter::new(strategy);
        let from_bytes = fp.key_for_bytes(&content);
        let from_file = fp.key_for_file(&path, size).unwrap();
        let from_stream = fp.key_for_reader(content.as_slice(), size).unwrap();

        prop_assert_eq!(&from_file, &from_bytes);
        prop_assert_eq!(&from_stream, &from_bytes);
        prop_assert!(from_bytes.matches_strategy(strategy));
        prop_assert_eq!(from_bytes.size(), Some(size));
    }

    #[test]
    fn test_size_crc_matches_archive_metadata_key(
        content in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let key = Fingerprinter::new(HashStrategy::SizeCrc).key_for_bytes(&content);
        let entry = ArchiveEntry::new("t.zip", "x", content.len() as u64, crc32fast::hash(&content));
        prop_assert_eq!(key, entry.content_key());
    }
}
