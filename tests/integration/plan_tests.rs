use std::path::Path;

use takeout_dedupe::cache::FingerprintCache;
use takeout_dedupe::dates::resolve_dates;
use takeout_dedupe::duplicates::group_entries;
use takeout_dedupe::reconcile::{DestinationScanner, ExtractionPlan, PlanStatus, Planner};
use takeout_dedupe::scanner::{ArchiveScanner, DirectoryScanner, Strategy};
use tempfile::tempdir;

use super::fixtures::{age_tree, write_tree, write_zip};

fn run_plan(input: &Path, dest: &Path, cache: &FingerprintCache, strategy: Strategy) -> ExtractionPlan {
    let scan = ArchiveScanner::new(input).scan().unwrap();
    let (groups, _) = group_entries(scan.entries);
    let dates = resolve_dates(groups.iter().flat_map(|g| g.entries.iter()), cache).unwrap();
    let snapshot = DestinationScanner::new(cache, DirectoryScanner::new(strategy))
        .snapshot(dest)
        .unwrap();
    Planner::new(strategy)
        .with_io_threads(2)
        .plan(&groups, &snapshot, &dates)
}

fn exports(root: &Path) {
    write_zip(
        &root.join("takeout-001.zip"),
        &[
            ("Takeout/Photos/beach.jpg", b"waves and sand"),
            ("Takeout/Photos/cat.jpg", b"purring animal"),
        ],
    );
    write_zip(
        &root.join("takeout-002.zip"),
        &[
            ("Takeout/Photos/beach(1).jpg", b"waves and sand"),
            ("Takeout/Photos/dog.jpg", b"barking"),
        ],
    );
}

#[test]
fn test_plan_skips_files_already_in_destination() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("in");
    let dest = tmp.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    exports(&input);
    write_tree(&dest, &[("2019/07/cat.jpg", b"purring animal")]);
    age_tree(&dest);

    for strategy in [Strategy::SizeCrc, Strategy::SizePartial, Strategy::Full] {
        let cache = FingerprintCache::open_in_memory().unwrap();
        let plan = run_plan(&input, &dest, &cache, strategy);

        let extract: Vec<&str> = plan
            .to_extract
            .iter()
            .map(|p| p.entry.entry_path.as_str())
            .collect();
        assert_eq!(
            extract,
            vec!["Takeout/Photos/beach.jpg", "Takeout/Photos/dog.jpg"],
            "strategy {strategy}"
        );
        assert_eq!(plan.already_present.len(), 1);
        let present = &plan.already_present[0];
        assert_eq!(present.status, PlanStatus::AlreadyPresent);
        assert_eq!(present.existing.as_deref(), Some(dest.join("2019/07/cat.jpg").as_path()));

        let beach = &plan.to_extract[0];
        assert_eq!(beach.duplicate_count, 1);
        assert_eq!(beach.proposed_location, "2019/07/beach.jpg");
        assert!(plan.errors.is_empty());
        assert!(!plan.is_complete());
    }
}

#[test]
fn test_second_run_reuses_cache() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("in");
    let dest = tmp.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    exports(&input);
    write_tree(
        &dest,
        &[
            ("2019/07/beach.jpg", b"waves and sand"),
            ("2019/07/cat.jpg", b"purring animal"),
            ("misc/unrelated.txt", b"not from any archive"),
        ],
    );
    age_tree(&dest);
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");

    {
        let cache = FingerprintCache::open(&cache_path).unwrap();
        let plan = run_plan(&input, &dest, &cache, Strategy::SizePartial);
        assert_eq!(plan.to_extract.len(), 1);
        cache.close().unwrap();
    }

    let cache = FingerprintCache::open(&cache_path).unwrap();
    let counts = cache.count().unwrap();
    assert_eq!(counts.directory_files, 3);
    assert_eq!(counts.directory_scans, 1);
    assert_eq!(counts.dates, 4);

    let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::SizePartial))
        .snapshot(&dest)
        .unwrap();
    assert!(snapshot.stats.trusted);

    let plan = run_plan(&input, &dest, &cache, Strategy::SizePartial);
    assert_eq!(plan.to_extract.len(), 1);
    assert_eq!(plan.to_extract[0].entry.entry_path, "Takeout/Photos/dog.jpg");
}

#[test]
fn test_empty_destination_extracts_every_canonical_entry() {
    let tmp = tempdir().unwrap();
    exports(tmp.path());
    let cache = FingerprintCache::open_in_memory().unwrap();

    let plan = run_plan(tmp.path(), &tmp.path().join("missing"), &cache, Strategy::Full);
    assert_eq!(plan.to_extract.len(), 3);
    assert!(plan.already_present.is_empty());
    assert_eq!(plan.keyed_from_content, 0);
    assert_eq!(plan.extract_size(), 14 + 14 + 7);
}
