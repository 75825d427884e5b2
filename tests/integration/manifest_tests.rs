use std::fs;

use takeout_dedupe::cache::FingerprintCache;
use takeout_dedupe::dates::resolve_dates;
use takeout_dedupe::duplicates::group_entries;
use takeout_dedupe::output::{Manifest, ManifestFile};
use takeout_dedupe::reconcile::DestinationScanner;
use takeout_dedupe::scanner::{ArchiveScanner, DirectoryScanner, Strategy};
use tempfile::tempdir;

use super::fixtures::{age_tree, write_tree, write_zip};

#[test]
fn test_manifest_tracks_extraction_progress() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("exports");
    let dest = tmp.path().join("library");
    fs::create_dir_all(&input).unwrap();
    let first_zip = input.join("takeout-001.zip");
    let second_zip = input.join("takeout-002.zip");
    write_zip(
        &first_zip,
        &[
            ("Takeout/Photos/sunset.jpg", b"orange sky"),
            ("Takeout/Photos/forest.jpg", b"green trees"),
        ],
    );
    write_zip(
        &second_zip,
        &[
            ("Takeout/Photos/sunset(1).jpg", b"orange sky"),
            ("Takeout/Photos/river.jpg", b"flowing water"),
        ],
    );

    let cache = FingerprintCache::open_in_memory().unwrap();
    let scan = ArchiveScanner::new(&input).scan().unwrap();
    let (groups, _) = group_entries(scan.entries);
    let dates = resolve_dates(groups.iter().flat_map(|g| g.entries.iter()), &cache).unwrap();
    let manifest = Manifest::from_groups(&groups, &dates);
    assert_eq!(manifest.total_unique_files, 3);
    let sunset = manifest
        .files
        .iter()
        .find(|f| f.source_path.ends_with("sunset.jpg"))
        .unwrap();
    assert_eq!(sunset.duplicate_count, 1);
    assert_eq!(sunset.proposed_location, "2019/07/sunset.jpg");

    let manifest_path = tmp.path().join("manifest.json");
    manifest.write_to_path(&manifest_path).unwrap();
    let loaded = Manifest::read_from_path(&manifest_path).unwrap();
    assert_eq!(loaded, manifest);

    // Only the sunset has been extracted so far; the second archive is gone.
    write_tree(&dest, &[("2019/07/sunset.jpg", b"orange sky")]);
    age_tree(&dest);
    fs::remove_file(&second_zip).unwrap();

    let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(loaded.strategy))
        .snapshot(&dest)
        .unwrap();
    let result = loaded.reconcile(&snapshot);

    let names = |files: &[ManifestFile]| -> Vec<String> {
        files.iter().map(|f| f.source_path.clone()).collect()
    };
    assert_eq!(names(&result.extracted), vec!["Takeout/Photos/sunset.jpg"]);
    assert_eq!(names(&result.pending), vec!["Takeout/Photos/forest.jpg"]);
    assert_eq!(names(&result.source_missing), vec!["Takeout/Photos/river.jpg"]);
    assert_eq!(result.pending_by_year().get("2019"), Some(&1));
    assert!(!result.is_complete());

    // Finish the job and reconcile again.
    write_tree(
        &dest,
        &[
            ("2019/07/forest.jpg", b"green trees"),
            ("2019/07/river.jpg", b"flowing water"),
        ],
    );
    let snapshot = DestinationScanner::new(&cache, DirectoryScanner::new(Strategy::SizeCrc))
        .snapshot(&dest)
        .unwrap();
    let result = loaded.reconcile(&snapshot);
    assert_eq!(result.extracted.len(), 3);
    assert!(result.is_complete());
    assert!((result.extracted_pct() - 100.0).abs() < f64::EPSILON);
}
