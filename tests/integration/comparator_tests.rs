use std::collections::BTreeSet;
use std::path::PathBuf;

use takeout_dedupe::cache::FingerprintCache;
use takeout_dedupe::reconcile::{diff_directories, ReconcileError, ZipDirectoryComparator};
use takeout_dedupe::scanner::{DirectoryScanner, ScanError, Strategy};
use tempfile::tempdir;

use super::fixtures::{age_tree, write_tree, write_zip};

#[test]
fn test_compare_zip_with_directory() {
    let tmp = tempdir().unwrap();
    let zip = tmp.path().join("takeout.zip");
    write_zip(
        &zip,
        &[
            ("Photos/in_both.jpg", b"shared content"),
            ("Photos/only_zip.jpg", b"archive only!!"),
            ("Photos/small.txt", b"tiny"),
        ],
    );
    let dir = tmp.path().join("library");
    write_tree(
        &dir,
        &[
            ("2019/renamed.jpg", b"shared content"),
            ("2019/only_dir.jpg", b"directory only"),
        ],
    );

    for strategy in [Strategy::SizeCrc, Strategy::SizePartial, Strategy::Full] {
        let comparison = ZipDirectoryComparator::new(DirectoryScanner::new(strategy))
            .compare_paths(&zip, &dir)
            .unwrap();

        assert_eq!(comparison.duplicates.len(), 1, "strategy {strategy}");
        let (entry, file) = &comparison.duplicates[0];
        assert_eq!(entry.entry_path, "Photos/in_both.jpg");
        assert_eq!(file.path, dir.join("2019/renamed.jpg"));

        let only_zip: Vec<&str> = comparison
            .unique_in_archive
            .iter()
            .map(|e| e.entry_path.as_str())
            .collect();
        assert_eq!(only_zip, vec!["Photos/only_zip.jpg", "Photos/small.txt"]);

        let only_dir: Vec<PathBuf> = comparison
            .unique_in_directory
            .iter()
            .map(|f| f.path.clone())
            .collect();
        assert_eq!(only_dir, vec![dir.join("2019/only_dir.jpg")]);

        let summary = comparison.summary();
        assert_eq!(summary.archive_entries, 3);
        assert_eq!(summary.duplicate_size, 14);
        assert_eq!(summary.unique_archive_size, 18);
        assert!(comparison.errors.is_empty());
    }
}

#[test]
fn test_compare_with_cache_trusts_second_run() {
    let tmp = tempdir().unwrap();
    let zip = tmp.path().join("t.zip");
    write_zip(&zip, &[("a.jpg", b"alpha"), ("b.jpg", b"bravo")]);
    let dir = tmp.path().join("lib");
    write_tree(&dir, &[("a.jpg", b"alpha"), ("c.jpg", b"charlie")]);
    age_tree(&dir);

    let cache = FingerprintCache::open_in_memory().unwrap();
    let comparator =
        ZipDirectoryComparator::new(DirectoryScanner::new(Strategy::Full)).with_cache(&cache);

    let first = comparator.compare_paths(&zip, &dir).unwrap();
    assert_eq!(cache.get_directory_entries(&dir).unwrap().len(), 2);
    let watermark = cache.get_scan_watermark(&dir).unwrap().unwrap();
    assert_eq!(watermark.file_count, 2);

    let second = comparator.compare_paths(&zip, &dir).unwrap();
    assert_eq!(first.summary(), second.summary());
    assert_eq!(second.duplicates.len(), 1);
    assert_eq!(second.unique_in_archive.len(), 1);
    assert_eq!(second.unique_in_directory.len(), 1);
}

#[test]
fn test_compare_missing_directory_fails() {
    let tmp = tempdir().unwrap();
    let zip = tmp.path().join("t.zip");
    write_zip(&zip, &[("a.jpg", b"alpha")]);

    let err = ZipDirectoryComparator::new(DirectoryScanner::new(Strategy::SizeCrc))
        .compare_paths(&zip, &tmp.path().join("nowhere"))
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Scan(ScanError::NotFound(_))));
}

#[test]
fn test_compare_corrupt_zip_fails() {
    let tmp = tempdir().unwrap();
    let zip = tmp.path().join("broken.zip");
    std::fs::write(&zip, b"PK but not really").unwrap();
    let dir = tmp.path().join("lib");
    write_tree(&dir, &[("a.jpg", b"alpha")]);

    let result = ZipDirectoryComparator::new(DirectoryScanner::new(Strategy::SizeCrc))
        .compare_paths(&zip, &dir);
    assert!(matches!(result, Err(ReconcileError::Archive(_))));
}

#[test]
fn test_diff_reports_missing_by_content() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("src");
    let dest = tmp.path().join("dst");
    write_tree(
        &source,
        &[
            ("a.jpg", b"alpha"),
            ("nested/b.jpg", b"bravo"),
            ("nested/c.jpg", b"charlie"),
        ],
    );
    write_tree(
        &dest,
        &[("renamed/alpha.jpg", b"alpha"), ("x/c.jpg", b"charlie")],
    );

    let diff = diff_directories(&DirectoryScanner::new(Strategy::SizePartial), &source, &dest).unwrap();
    assert_eq!(diff.missing_paths(), vec![source.join("nested/b.jpg")]);
    assert_eq!(diff.missing_size(), 5);

    let present: BTreeSet<PathBuf> = diff.present.iter().map(|(s, _)| s.path.clone()).collect();
    assert_eq!(
        present,
        [source.join("a.jpg"), source.join("nested/c.jpg")]
            .into_iter()
            .collect()
    );
}

#[test]
fn test_diff_missing_destination_is_error() {
    let tmp = tempdir().unwrap();
    write_tree(tmp.path(), &[("a.jpg", b"alpha")]);
    let result = diff_directories(
        &DirectoryScanner::new(Strategy::Full),
        tmp.path(),
        &tmp.path().join("absent"),
    );
    assert!(matches!(result, Err(ScanError::NotFound(_))));
}
