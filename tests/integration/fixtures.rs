//! Shared helpers: zip archives, destination trees and mtimes.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use zip::write::SimpleFileOptions;

/// Write a zip archive with every entry dated 2019-07-04 12:00.
pub fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .last_modified_time(zip::DateTime::from_date_and_time(2019, 7, 4, 12, 0, 0).unwrap());
    for (name, data) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Write `files` under `root`, creating parent directories.
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(rel, data)| {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, data).unwrap();
            path
        })
        .collect()
}

/// Set the mtime of `path` to `secs` since the epoch.
pub fn set_mtime(path: &Path, secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

/// Push every file under `root` an hour into the past so a watermark taken
/// now is strictly newer.
pub fn age_tree(root: &Path) {
    let past = chrono::Utc::now().timestamp() - 3600;
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            set_mtime(entry.path(), past);
        }
    }
}
