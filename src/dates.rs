//! Date resolution for archive entries, through the fingerprint cache.
//!
//! A date is looked up in the cache first and otherwise taken from the
//! timestamp embedded in the archive. Newly resolved values are written back
//! with [`FingerprintCache::set_date`] and flushed once at the end, so the
//! next run answers from the cache without touching archive metadata.
//!
//! Dates only drive the proposed destination path; they never take part
//! in duplicate detection.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;

use crate::cache::{CacheResult, EntryIdentity, FingerprintCache};
use crate::scanner::ArchiveEntry;

/// Folder used for entries without any date.
pub const UNDATED_DIR: &str = "undated";

/// Where resolved dates came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateStats {
    /// Served by the cache
    pub from_cache: usize,
    /// Taken from the embedded archive timestamp
    pub from_archive: usize,
    /// No date available
    pub missing: usize,
}

/// Dates keyed by entry identity.
#[derive(Debug, Clone, Default)]
pub struct ResolvedDates {
    dates: HashMap<EntryIdentity, NaiveDateTime>,
    /// Resolution counters
    pub stats: DateStats,
}

impl ResolvedDates {
    /// Date for `entry`, if one was resolved.
    #[must_use]
    pub fn get(&self, entry: &ArchiveEntry) -> Option<NaiveDateTime> {
        self.dates.get(&EntryIdentity::from(entry)).copied()
    }

    /// Record a date resolved elsewhere.
    pub fn insert(&mut self, entry: &ArchiveEntry, date: NaiveDateTime) {
        self.dates.insert(EntryIdentity::from(entry), date);
    }

    /// Number of entries with a date.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether no entry has a date.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Resolve dates for `entries`, populating the cache with new values.
///
/// # Errors
///
/// Returns an error if the cache cannot be read or flushed.
pub fn resolve_dates<'a>(
    entries: impl IntoIterator<Item = &'a ArchiveEntry>,
    cache: &FingerprintCache,
) -> CacheResult<ResolvedDates> {
    let cached = cache.get_cached_dates_bulk()?;
    let mut resolved = ResolvedDates::default();

    for entry in entries {
        let identity = EntryIdentity::from(entry);
        if resolved.dates.contains_key(&identity) {
            continue;
        }
        if let Some(date) = cached.get(&identity) {
            resolved.stats.from_cache += 1;
            resolved.dates.insert(identity, *date);
            continue;
        }

        cache.set_date(&identity, entry.modified)?;
        match entry.modified {
            Some(date) => {
                resolved.stats.from_archive += 1;
                resolved.dates.insert(identity, date);
            }
            None => {
                log::trace!("No date for {}", entry.display_path());
                resolved.stats.missing += 1;
            }
        }
    }
    cache.flush()?;

    log::info!(
        "Dates: {} from cache, {} from archives, {} missing",
        resolved.stats.from_cache,
        resolved.stats.from_archive,
        resolved.stats.missing
    );
    Ok(resolved)
}

/// Proposed destination path: `{year}/{month:02}/{file name}` or
/// `undated/{file name}`.
///
/// ```
/// use chrono::NaiveDate;
/// use takeout_dedupe::dates::propose_location;
///
/// let date = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap().and_hms_opt(10, 30, 0);
/// assert_eq!(propose_location("IMG_1.jpg", date), "2021/05/IMG_1.jpg");
/// assert_eq!(propose_location("IMG_1.jpg", None), "undated/IMG_1.jpg");
/// ```
#[must_use]
pub fn propose_location(file_name: &str, date: Option<NaiveDateTime>) -> String {
    match date {
        Some(date) => format!("{}/{:02}/{}", date.year(), date.month(), file_name),
        None => format!("{}/{}", UNDATED_DIR, file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_resolve_then_serve_from_cache() {
        let cache = FingerprintCache::open_in_memory().unwrap();
        let entries = vec![
            ArchiveEntry::new("t.zip", "a.jpg", 10, 1).with_modified(Some(date(2020, 1, 2))),
            ArchiveEntry::new("t.zip", "b.jpg", 20, 2),
        ];

        let first = resolve_dates(&entries, &cache).unwrap();
        assert_eq!(first.stats.from_archive, 1);
        assert_eq!(first.stats.missing, 1);
        assert_eq!(first.get(&entries[0]), Some(date(2020, 1, 2)));
        assert_eq!(first.get(&entries[1]), None);
        assert_eq!(cache.pending_dates(), 0);

        let second = resolve_dates(&entries, &cache).unwrap();
        assert_eq!(second.stats.from_cache, 1);
        assert_eq!(second.stats.missing, 1);
    }

    #[test]
    fn test_cached_date_wins_over_embedded() {
        let cache = FingerprintCache::open_in_memory().unwrap();
        let entry = ArchiveEntry::new("t.zip", "a.jpg", 10, 1).with_modified(Some(date(2020, 1, 2)));
        cache
            .set_date(&EntryIdentity::from(&entry), Some(date(2015, 6, 7)))
            .unwrap();
        cache.flush().unwrap();

        let resolved = resolve_dates([&entry], &cache).unwrap();
        assert_eq!(resolved.get(&entry), Some(date(2015, 6, 7)));
        assert_eq!(resolved.stats.from_cache, 1);
    }

    #[test]
    fn test_propose_location_pads_month() {
        assert_eq!(propose_location("x.png", Some(date(1999, 12, 31))), "1999/12/x.png");
        assert_eq!(propose_location("x.png", Some(date(2001, 3, 1))), "2001/03/x.png");
    }
}
