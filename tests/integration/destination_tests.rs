use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rusqlite::Connection;
use takeout_dedupe::cache::FingerprintCache;
use takeout_dedupe::reconcile::{DestinationScanner, DestinationSnapshot};
use takeout_dedupe::scanner::{ContentKey, DirectoryScanner, Strategy};
use tempfile::tempdir;

use super::fixtures::{age_tree, set_mtime, write_tree};

fn keys(snapshot: &DestinationSnapshot) -> Vec<(PathBuf, ContentKey)> {
    let mut pairs: Vec<(PathBuf, ContentKey)> = snapshot
        .index()
        .iter()
        .flat_map(|(key, files)| files.iter().map(move |f| (f.path.clone(), key.clone())))
        .collect();
    pairs.sort();
    pairs
}

fn ten_files(root: &Path) -> Vec<PathBuf> {
    let files: Vec<(String, Vec<u8>)> = (0..10)
        .map(|i| {
            (
                format!("{}/IMG_{i:04}.jpg", 2015 + i % 3),
                format!("photo number {i}").into_bytes(),
            )
        })
        .collect();
    let borrowed: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(p, d)| (p.as_str(), d.as_slice()))
        .collect();
    let paths = write_tree(root, &borrowed);
    age_tree(root);
    paths
}

#[test]
fn test_second_run_is_trusted_and_identical() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    ten_files(dir.path());

    let cache = FingerprintCache::open(&cache_dir.path().join("cache.db")).unwrap();
    let scanner = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::SizePartial));

    let first = scanner.snapshot(dir.path()).unwrap();
    assert!(!first.stats.trusted);
    assert_eq!(first.stats.rehashed, 10);

    let second = scanner.snapshot(dir.path()).unwrap();
    assert!(second.stats.trusted);
    assert_eq!(second.stats.rehashed, 0);
    assert_eq!(second.stats.from_cache, 10);
    assert_eq!(keys(&first), keys(&second));
}

#[test]
fn test_trusted_across_cache_handles() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");
    ten_files(dir.path());

    let first = {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::Full))
            .snapshot(dir.path())
            .unwrap();
        cache.close().unwrap();
        snapshot
    };

    let cache = FingerprintCache::open(&cache_path).unwrap();
    let second = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::Full))
        .snapshot(dir.path())
        .unwrap();
    assert!(second.stats.trusted);
    assert_eq!(keys(&first), keys(&second));
}

#[test]
fn test_size_change_rehashes_only_that_file() {
    let dir = tempdir().unwrap();
    let paths = ten_files(dir.path());
    let cache = FingerprintCache::open_in_memory().unwrap();
    let scanner = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::SizePartial));
    scanner.snapshot(dir.path()).unwrap();
    let watermark = cache.get_scan_watermark(dir.path()).unwrap().unwrap();

    let changed = &paths[3];
    fs::write(changed, b"a longer replacement body").unwrap();
    set_mtime(changed, watermark.last_scanned.timestamp() + 5);

    let snapshot = scanner.snapshot(dir.path()).unwrap();
    assert!(!snapshot.stats.trusted);
    assert_eq!(snapshot.stats.rehashed_paths, vec![changed.clone()]);
    assert_eq!(snapshot.stats.from_cache, 9);
    assert!(snapshot.has_size(25));
}

#[test]
fn test_mtime_change_rehashes_only_that_file() {
    let dir = tempdir().unwrap();
    let paths = ten_files(dir.path());
    let cache = FingerprintCache::open_in_memory().unwrap();
    let scanner = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::Full));
    let before = scanner.snapshot(dir.path()).unwrap();
    let watermark = cache.get_scan_watermark(dir.path()).unwrap().unwrap();
    assert_eq!(watermark.file_count, 10);

    // Same count, one file touched one second after the watermark.
    let touched = &paths[7];
    set_mtime(touched, watermark.last_scanned.timestamp() + 1);

    let after = scanner.snapshot(dir.path()).unwrap();
    assert!(!after.stats.trusted);
    assert_eq!(after.stats.rehashed, 1);
    assert_eq!(after.stats.rehashed_paths, vec![touched.clone()]);
    assert_eq!(after.stats.pruned, 0);
    assert_eq!(keys(&before), keys(&after));
}

#[test]
fn test_new_file_is_hashed_alone() {
    let dir = tempdir().unwrap();
    ten_files(dir.path());
    let cache = FingerprintCache::open_in_memory().unwrap();
    let scanner = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::SizeCrc));
    scanner.snapshot(dir.path()).unwrap();

    let added = write_tree(dir.path(), &[("2020/new.jpg", b"brand new")]);
    age_tree(dir.path());

    let snapshot = scanner.snapshot(dir.path()).unwrap();
    assert!(!snapshot.stats.trusted);
    assert_eq!(snapshot.stats.rehashed_paths, added);
    assert_eq!(snapshot.len(), 11);

    // Watermark now covers eleven files.
    let again = scanner.snapshot(dir.path()).unwrap();
    assert!(again.stats.trusted);
}

#[test]
fn test_interrupted_snapshot_keeps_watermark() {
    let dir = tempdir().unwrap();
    ten_files(dir.path());
    let cache = FingerprintCache::open_in_memory().unwrap();

    let flag = Arc::new(AtomicBool::new(true));
    let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::Full))
        .with_shutdown_flag(flag)
        .snapshot(dir.path())
        .unwrap();
    assert!(snapshot.stats.interrupted);
    assert!(cache.get_scan_watermark(dir.path()).unwrap().is_none());
}

#[test]
fn test_tolerance_absorbs_small_mtime_drift() {
    let dir = tempdir().unwrap();
    let paths = ten_files(dir.path());
    let cache = FingerprintCache::open_in_memory().unwrap();
    let scanner = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::Full))
        .with_mtime_tolerance(5.0);
    scanner.snapshot(dir.path()).unwrap();

    // Drift of 2s on a file forces verification but not a re-hash.
    let record_mtime = fs::metadata(&paths[0])
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    set_mtime(&paths[0], record_mtime + 2);
    fs::write(dir.path().join("extra.txt"), b"x").unwrap();

    let snapshot = scanner.snapshot(dir.path()).unwrap();
    assert!(!snapshot.stats.trusted);
    assert_eq!(snapshot.stats.rehashed, 1);
    assert_eq!(
        snapshot.stats.rehashed_paths,
        vec![dir.path().join("extra.txt")]
    );
}

/// Run one snapshot into the cache at `cache_path`, then close the cache.
fn primed_cache(root: &Path, cache_path: &Path, strategy: Strategy) {
    let cache = FingerprintCache::open(cache_path).unwrap();
    let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(strategy))
        .snapshot(root)
        .unwrap();
    assert_eq!(snapshot.stats.rehashed, 10);
    cache.close().unwrap();
}

#[test]
fn test_malformed_record_is_rehashed_alone() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");
    let paths = ten_files(dir.path());
    primed_cache(dir.path(), &cache_path, Strategy::SizePartial);

    let changed = Connection::open(&cache_path)
        .unwrap()
        .execute(
            "UPDATE directory_files SET mtime = 'garbage' WHERE file_path LIKE '%IMG_0003.jpg'",
            [],
        )
        .unwrap();
    assert_eq!(changed, 1);

    let cache = FingerprintCache::open(&cache_path).unwrap();
    let scanner = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::SizePartial));
    let patched = scanner.snapshot(dir.path()).unwrap();
    assert!(!patched.stats.trusted);
    assert_eq!(patched.stats.from_cache, 9);
    assert_eq!(patched.stats.rehashed_paths, vec![paths[3].clone()]);
    assert_eq!(patched.len(), 10);

    let healed = scanner.snapshot(dir.path()).unwrap();
    assert!(healed.stats.trusted);
    assert_eq!(keys(&patched), keys(&healed));
}

#[test]
fn test_unparseable_watermark_is_not_trusted() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");
    ten_files(dir.path());
    primed_cache(dir.path(), &cache_path, Strategy::Full);

    Connection::open(&cache_path)
        .unwrap()
        .execute("UPDATE directory_scans SET last_scanned = 'last tuesday'", [])
        .unwrap();

    let cache = FingerprintCache::open(&cache_path).unwrap();
    assert_eq!(cache.get_scan_watermark(dir.path()).unwrap(), None);

    let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::Full))
        .snapshot(dir.path())
        .unwrap();
    assert!(!snapshot.stats.trusted);
    assert_eq!(snapshot.stats.from_cache, 10);
    assert_eq!(snapshot.stats.rehashed, 0);
    assert!(cache.get_scan_watermark(dir.path()).unwrap().is_some());
}
