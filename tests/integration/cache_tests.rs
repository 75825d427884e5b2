
use chrono::{NaiveDate, Timelike};
use rayon::prelude::*;
use rusqlite::Connection;
use takeout_dedupe::cache::{EntryIdentity, FingerprintCache};
use takeout_dedupe::dates::resolve_dates;
use takeout_dedupe::scanner::ArchiveScanner;
use tempfile::tempdir;

use super::fixtures::write_zip;

#[test]
fn test_dates_survive_reopen_at_second_precision() {
    let tmp = tempdir().unwrap();
    let cache_path = tmp.path().join("cache").join("fingerprints.db");
    let identity = EntryIdentity::new("Takeout-003.zip", "Photos/IMG_9.jpg", 4096, 0xDEAD_BEEF);
    let when = NaiveDate::from_ymd_opt(2018, 2, 28)
        .unwrap()
        .and_hms_milli_opt(23, 59, 58, 750)
        .unwrap();

    {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        cache.set_date(&identity, Some(when)).unwrap();
        cache.close().unwrap();
    }

    let cache = FingerprintCache::open(&cache_path).unwrap();
    let stored = cache.get_date(&identity).unwrap().unwrap();
    assert_eq!(stored, when.with_nanosecond(0).unwrap());
}

#[test]
fn test_archive_dates_served_from_cache_on_second_run() {
    let tmp = tempdir().unwrap();
    write_zip(
        &tmp.path().join("takeout-001.zip"),
        &[("Photos/a.jpg", b"alpha"), ("Photos/b.jpg", b"bravo")],
    );
    let cache_path = tmp.path().join("fingerprints.db");
    let entries = ArchiveScanner::new(tmp.path()).scan().unwrap().entries;

    {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        let first = resolve_dates(&entries, &cache).unwrap();
        assert_eq!(first.stats.from_archive, 2);
        assert_eq!(first.stats.from_cache, 0);
        cache.close().unwrap();
    }

    let cache = FingerprintCache::open(&cache_path).unwrap();
    let second = resolve_dates(&entries, &cache).unwrap();
    assert_eq!(second.stats.from_cache, 2);
    assert_eq!(second.stats.from_archive, 0);
    let expected = NaiveDate::from_ymd_opt(2019, 7, 4)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    assert_eq!(second.get(&entries[0]), Some(expected));
}

#[test]
fn test_parallel_writers_share_one_handle() {
    let tmp = tempdir().unwrap();
    let cache = FingerprintCache::open(&tmp.path().join("c.db"))
        .unwrap()
        .with_batch_size(7);
    let when = NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    (0..200u32).into_par_iter().for_each(|i| {
        let id = EntryIdentity::new("a.zip", format!("f{i}.jpg"), u64::from(i), i);
        cache.set_date(&id, Some(when)).unwrap();
    });
    cache.flush().unwrap();

    assert_eq!(cache.count().unwrap().dates, 200);
    let sample = EntryIdentity::new("a.zip", "f123.jpg", 123, 123);
    assert_eq!(cache.get_date(&sample).unwrap(), Some(when));
}

#[test]
fn test_clear_empties_every_table() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("dest");
    std::fs::create_dir_all(&root).unwrap();
    let cache = FingerprintCache::open(&tmp.path().join("c.db")).unwrap();

    cache
        .set_date(&EntryIdentity::new("a.zip", "x", 1, 1), None)
        .unwrap();
    cache.flush().unwrap();
    cache.set_scan_watermark(&root, 0).unwrap();
    assert_eq!(cache.count().unwrap().total(), 2);

    cache.clear().unwrap();
    assert_eq!(cache.count().unwrap().total(), 0);
    assert!(cache.get_scan_watermark(&root).unwrap().is_none());
}

#[test]
fn test_malformed_cached_dates_fall_back_to_archive() {
    let tmp = tempdir().unwrap();
    write_zip(
        &tmp.path().join("takeout-001.zip"),
        &[("Photos/a.jpg", b"alpha"), ("Photos/b.jpg", b"bravo")],
    );
    let cache_path = tmp.path().join("fingerprints.db");
    let entries = ArchiveScanner::new(tmp.path()).scan().unwrap().entries;

    {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        resolve_dates(&entries, &cache).unwrap();
        cache.close().unwrap();
    }
    Connection::open(&cache_path)
        .unwrap()
        .execute(
            "UPDATE file_dates SET extracted_date = x'deadbeef' WHERE entry_path = 'Photos/a.jpg'",
            [],
        )
        .unwrap();

    let cache = FingerprintCache::open(&cache_path).unwrap();
    let corrupted = EntryIdentity::from(&entries[0]);
    assert_eq!(cache.get_date(&corrupted).unwrap(), None);
    let bulk = cache.get_cached_dates_bulk().unwrap();
    assert_eq!(bulk.len(), 1);
    assert!(bulk.contains_key(&EntryIdentity::from(&entries[1])));

    let resolved = resolve_dates(&entries, &cache).unwrap();
    assert_eq!(resolved.stats.from_cache, 1);
    assert_eq!(resolved.stats.from_archive, 1);
    cache.flush().unwrap();
    assert!(cache.get_date(&corrupted).unwrap().is_some());
}
