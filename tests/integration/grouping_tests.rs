use std::fs;

use takeout_dedupe::duplicates::{group_entries, identical_archives, summarize_archives};
use takeout_dedupe::scanner::{ArchiveScanner, ContentKey};
use tempfile::tempdir;

use super::fixtures::write_zip;

#[test]
fn test_duplicates_across_archives() {
    let dir = tempdir().unwrap();
    write_zip(
        &dir.path().join("takeout-001.zip"),
        &[
            ("Takeout/Photos/a.jpg", b"same bytes"),
            ("Takeout/Photos/b.png", b"only here"),
        ],
    );
    write_zip(
        &dir.path().join("takeout-002.zip"),
        &[
            ("Takeout/Photos/a(1).jpg", b"same bytes"),
            ("Takeout/Photos/c.gif", b"different"),
        ],
    );

    let scan = ArchiveScanner::new(dir.path()).scan().unwrap();
    assert_eq!(scan.archives.len(), 2);
    let (groups, stats) = group_entries(scan.entries);

    assert_eq!(stats.total_entries, 4);
    assert_eq!(stats.groups, 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.wasted_size, 10);

    let dup = groups.duplicates().next().unwrap();
    let canonical = dup.canonical().unwrap();
    assert_eq!(canonical.entry_path, "Takeout/Photos/a.jpg");
    assert!(canonical.archive_path.ends_with("takeout-001.zip"));
    assert_eq!(dup.entries[1].entry_path, "Takeout/Photos/a(1).jpg");
}

#[test]
fn test_same_name_same_size_different_content_stays_apart() {
    let dir = tempdir().unwrap();
    write_zip(&dir.path().join("one.zip"), &[("IMG_1.jpg", b"aaaa")]);
    write_zip(&dir.path().join("two.zip"), &[("IMG_1(1).jpg", b"bbbb")]);

    let scan = ArchiveScanner::new(dir.path()).scan().unwrap();
    let (groups, stats) = group_entries(scan.entries);
    assert_eq!(stats.groups, 2);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(groups.duplicates().count(), 0);
}

#[test]
fn test_distinct_names_are_settled_without_checksums() {
    // Phase 1 partitions by (size, normalized name): a renamed copy is a
    // singleton and never reaches the checksum comparison.
    let dir = tempdir().unwrap();
    write_zip(
        &dir.path().join("one.zip"),
        &[
            ("holiday.jpg", b"xyz"),
            ("other.jpg", b"xyz"),
            ("HOLIDAY(2).JPG", b"xyz"),
        ],
    );

    let scan = ArchiveScanner::new(dir.path()).scan().unwrap();
    let (groups, stats) = group_entries(scan.entries);
    assert_eq!(stats.unique_by_name, 1);
    assert_eq!(stats.checked_by_checksum, 2);
    assert_eq!(stats.duplicates, 1);
    let group = groups.duplicates().next().unwrap();
    assert_eq!(group.canonical().unwrap().entry_path, "holiday.jpg");
    assert_eq!(group.entries[1].entry_path, "HOLIDAY(2).JPG");
}

#[test]
fn test_identical_archives_share_signature() {
    let dir = tempdir().unwrap();
    let files: &[(&str, &[u8])] = &[("x/1.jpg", b"one"), ("x/2.jpg", b"two")];
    write_zip(&dir.path().join("a.zip"), files);
    write_zip(
        &dir.path().join("b.zip"),
        &[("y/2.jpg", b"two"), ("y/1.jpg", b"one")],
    );
    write_zip(&dir.path().join("c.zip"), &[("z/3.jpg", b"three")]);

    let scan = ArchiveScanner::new(dir.path()).scan().unwrap();
    let (groups, _) = group_entries(scan.entries);
    let summaries = summarize_archives(&groups);
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0].signature, summaries[1].signature);
    assert_ne!(summaries[0].signature, summaries[2].signature);

    let identical = identical_archives(&summaries);
    assert_eq!(
        identical,
        vec![vec![dir.path().join("a.zip"), dir.path().join("b.zip")]]
    );
    // b.zip only holds content that a.zip already has.
    assert!(summaries[1].is_redundant());
    assert!(!summaries[2].is_redundant());
}

#[test]
fn test_corrupt_archive_does_not_stop_the_batch() {
    let dir = tempdir().unwrap();
    write_zip(&dir.path().join("good.zip"), &[("a.jpg", b"fine")]);
    fs::write(dir.path().join("bad.zip"), b"definitely not a zip").unwrap();

    let scan = ArchiveScanner::new(dir.path()).scan().unwrap();
    assert_eq!(scan.archives, vec![dir.path().join("good.zip")]);
    assert_eq!(scan.failed_archives.len(), 1);
    assert_eq!(scan.failed_archives[0].0, dir.path().join("bad.zip"));

    let (groups, _) = group_entries(scan.entries);
    let key = ContentKey::from_crc(4, crc32fast::hash(b"fine"));
    assert!(groups.iter().any(|g| g.entries[0].content_key() == key));
}
