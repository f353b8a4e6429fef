//! Catalog regeneration.
//!
//! Builds a fresh [`Catalog`] from the chapter folders on disk, the series
//! configuration, and (when one exists) the previously persisted catalog.
//! The prior catalog is authoritative for everything that accumulates over
//! time and must survive regeneration: view counts, upload dates, chapter
//! titles, series metadata.
//!
//! ## Chapter set
//!
//! Every scanned folder plus every configured locked key, in numeric order.
//! A configured locked key whose folder now exists is published ("auto
//! unlock"): the folder always wins over the configuration.
//!
//! ## First-time vs update
//!
//! | | first-time (no prior) | update |
//! |---|---|---|
//! | chapter views | 0 | prior value, 0 for new chapters |
//! | series total | 0 | prior value |
//! | upload date | derived | prior value, derived for new chapters |
//! | title | `Chapter <key>` | prior value |
//!
//! Views are carried unconditionally on update, whether or not the chapter is
//! locked or still has a folder.
//!
//! ## Locked chapter dates
//!
//! A locked chapter has no folder to date. Once every chapter is processed,
//! any locked chapter still without a date is given the newest date in the
//! catalog, so previews show the latest release date instead of nothing.

use crate::config::SeriesConfig;
use crate::naming::ChapterKey;
use crate::scan::{ScannedChapters, ScannedFolder};
use crate::types::{CATALOG_SCHEMA_VERSION, Catalog, ChapterRecord, Series, default_chapter_title};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// How a chapter ended up after the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    /// Configured locked and no folder yet.
    Locked,
    /// Folder exists, not configured locked.
    Unlocked,
    /// Configured locked, but the folder exists, so it is published.
    AutoUnlocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterOutcome {
    pub key: ChapterKey,
    pub status: ChapterStatus,
    pub page_count: u32,
    pub views: u64,
    pub upload_date: Option<NaiveDate>,
}

/// What the merge decided, for operator reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub first_time: bool,
    pub chapters: Vec<ChapterOutcome>,
    /// Configured locked entries that are not chapter keys.
    pub invalid_locked: Vec<String>,
    pub total_views: u64,
}

impl MergeReport {
    pub fn count(&self, status: ChapterStatus) -> usize {
        self.chapters.iter().filter(|c| c.status == status).count()
    }

    pub fn chapter_views(&self) -> u64 {
        self.chapters.iter().map(|c| c.views).fold(0, u64::saturating_add)
    }
}

/// Merge scanned folders with configuration and the prior catalog.
///
/// `derive_date` is only called for chapters that have a folder and no prior
/// upload date, so the (potentially slow) history lookup runs once per new
/// chapter rather than on every regeneration.
pub fn merge(
    scanned: &ScannedChapters,
    config: &SeriesConfig,
    prior: Option<&Catalog>,
    derive_date: impl Fn(&ScannedFolder) -> NaiveDate,
    now: DateTime<Utc>,
) -> (Catalog, MergeReport) {
    let first_time = prior.is_none();

    let mut configured_locked = BTreeSet::new();
    let mut invalid_locked = Vec::new();
    for raw in &config.locked_chapters {
        match ChapterKey::parse(raw) {
            Some(key) => {
                configured_locked.insert(key);
            }
            None => {
                warn!(entry = %raw, "lockedChapters entry is not a chapter key, ignoring");
                invalid_locked.push(raw.clone());
            }
        }
    }

    let candidates: BTreeSet<&ChapterKey> =
        scanned.keys().chain(configured_locked.iter()).collect();

    let mut chapters = BTreeMap::new();
    let mut outcomes = Vec::with_capacity(candidates.len());

    for key in candidates {
        let folder = scanned.get(key);
        let is_configured_locked = configured_locked.contains(key);
        let locked = is_configured_locked && folder.is_none();
        let prior_record = prior.and_then(|p| p.chapters.get(key));

        let mut record = match prior_record {
            Some(old) => ChapterRecord {
                title: if old.title.is_empty() {
                    default_chapter_title(key)
                } else {
                    old.title.clone()
                },
                views: old.views,
                upload_date: old.upload_date,
                last_flush_id: old.last_flush_id.clone(),
                extra: old.extra.clone(),
                ..ChapterRecord::new(key)
            },
            None => ChapterRecord::new(key),
        };
        record.locked = locked;
        record.page_count = folder.map(|f| f.page_count).unwrap_or(0);
        if record.upload_date.is_none() {
            record.upload_date = folder.map(&derive_date);
        }

        let status = match (is_configured_locked, locked) {
            (true, true) => ChapterStatus::Locked,
            (true, false) => ChapterStatus::AutoUnlocked,
            (false, _) => ChapterStatus::Unlocked,
        };
        outcomes.push(ChapterOutcome {
            key: key.clone(),
            status,
            page_count: record.page_count,
            views: record.views,
            upload_date: record.upload_date,
        });
        chapters.insert(key.clone(), record);
    }

    let newest = chapters.values().filter_map(|c| c.upload_date).max();
    if let Some(newest) = newest {
        for (key, record) in chapters.iter_mut() {
            if record.locked && record.upload_date.is_none() {
                record.upload_date = Some(newest);
                if let Some(outcome) = outcomes.iter_mut().find(|o| &o.key == key) {
                    outcome.upload_date = Some(newest);
                }
            }
        }
    }

    let series = merge_series(prior.map(|p| &p.series), config);
    let total_views = series.total_views;

    let catalog = Catalog {
        schema_version: CATALOG_SCHEMA_VERSION,
        series,
        chapters,
        last_updated: Some(now),
        last_chapter_update: newest,
        extra: prior.map(|p| p.extra.clone()).unwrap_or_default(),
    };

    let report = MergeReport {
        first_time,
        chapters: outcomes,
        invalid_locked,
        total_views,
    };
    (catalog, report)
}

/// Series metadata: prior values win, configuration fills the gaps.
///
/// `lockedChapters` always comes from configuration. `totalViews` comes from
/// the prior catalog only, so a first-time run starts at zero regardless of
/// what the configuration says.
fn merge_series(prior: Option<&Series>, config: &SeriesConfig) -> Series {
    fn pick<T: Clone>(prior: Option<&Option<T>>, fresh: &Option<T>) -> Option<T> {
        prior.and_then(|p| p.clone()).or_else(|| fresh.clone())
    }

    Series {
        title: pick(prior.map(|p| &p.title), &config.title),
        alternative_title: pick(prior.map(|p| &p.alternative_title), &config.alternative_title),
        cover: pick(prior.map(|p| &p.cover), &config.cover),
        description: pick(prior.map(|p| &p.description), &config.description),
        author: pick(prior.map(|p| &p.author), &config.author),
        artist: pick(prior.map(|p| &p.artist), &config.artist),
        genre: pick(prior.map(|p| &p.genre), &config.genre),
        status: pick(prior.map(|p| &p.status), &config.status),
        links: pick(prior.map(|p| &p.links), &config.links),
        repo_url: pick(prior.map(|p| &p.repo_url), &config.repo_url()),
        image_prefix: pick(prior.map(|p| &p.image_prefix), &config.image_prefix),
        image_format: pick(prior.map(|p| &p.image_format), &config.image_format),
        total_views: prior.map(|p| p.total_views).unwrap_or(0),
        locked_chapters: config.locked_chapters.clone(),
        last_flush_id: prior.and_then(|p| p.last_flush_id.clone()),
        extra: prior.map(|p| p.extra.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn folder_date(_: &ScannedFolder) -> NaiveDate {
        date(2024, 5, 20)
    }

    fn scanned(entries: &[(&str, u32)]) -> ScannedChapters {
        entries
            .iter()
            .map(|(k, pages)| {
                (
                    key(k),
                    ScannedFolder {
                        path: PathBuf::from(k),
                        page_count: *pages,
                    },
                )
            })
            .collect()
    }

    fn config_locking(locked: &[&str]) -> SeriesConfig {
        SeriesConfig {
            title: Some("Config Title".into()),
            author: Some("Config Author".into()),
            locked_chapters: locked.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn candidate_set_is_union_sorted_numerically() {
        let (catalog, _) = merge(
            &scanned(&[("10", 5), ("2", 5)]),
            &config_locking(&["11", "1"]),
            None,
            folder_date,
            now(),
        );
        assert_eq!(chapter_keys(&catalog), vec!["1", "2", "10", "11"]);
    }

    #[test]
    fn auto_unlock_when_folder_exists() {
        let (catalog, report) = merge(
            &scanned(&[("3", 12)]),
            &config_locking(&["3"]),
            None,
            folder_date,
            now(),
        );
        let ch = find_chapter(&catalog, "3");
        assert!(!ch.locked);
        assert_eq!(ch.page_count, 12);
        assert_eq!(report.chapters[0].status, ChapterStatus::AutoUnlocked);
    }

    #[test]
    fn locked_without_folder_has_no_pages() {
        let (catalog, report) = merge(
            &scanned(&[("1", 20)]),
            &config_locking(&["2"]),
            None,
            folder_date,
            now(),
        );
        let ch = find_chapter(&catalog, "2");
        assert!(ch.locked);
        assert_eq!(ch.page_count, 0);
        assert_eq!(report.count(ChapterStatus::Locked), 1);
        assert_eq!(report.count(ChapterStatus::Unlocked), 1);
    }

    #[test]
    fn first_time_zeroes_all_views() {
        let config = SeriesConfig {
            links: Some(serde_json::json!({"discord": "x"})),
            ..config_locking(&["9"])
        };
        let (catalog, report) = merge(
            &scanned(&[("1", 1), ("2", 1)]),
            &config,
            None,
            folder_date,
            now(),
        );
        assert!(report.first_time);
        assert_eq!(catalog.series.total_views, 0);
        assert!(catalog.chapters.values().all(|c| c.views == 0));
    }

    #[test]
    fn update_carries_views_forward() {
        let prior = catalog_with(&[("1", 150, Some(date(2024, 1, 1))), ("2", 80, None)], 900);
        let (catalog, report) = merge(
            &scanned(&[("1", 20), ("2", 22), ("3", 18)]),
            &config_locking(&[]),
            Some(&prior),
            folder_date,
            now(),
        );
        assert!(!report.first_time);
        assert_eq!(find_chapter(&catalog, "1").views, 150);
        assert_eq!(find_chapter(&catalog, "2").views, 80);
        assert_eq!(find_chapter(&catalog, "3").views, 0);
        assert_eq!(catalog.series.total_views, 900);
    }

    #[test]
    fn views_carried_for_locked_and_vanished_chapters() {
        let prior = catalog_with(&[("4", 33, None)], 0);
        // "4" has no folder but is configured locked: views still carried.
        let (catalog, _) = merge(
            &scanned(&[]),
            &config_locking(&["4"]),
            Some(&prior),
            folder_date,
            now(),
        );
        assert_eq!(find_chapter(&catalog, "4").views, 33);
    }

    #[test]
    fn prior_upload_date_and_title_preserved() {
        let mut prior = catalog_with(&[("1", 0, Some(date(2023, 2, 3)))], 0);
        prior.chapters.get_mut(&key("1")).unwrap().title = "The Beginning".into();

        let (catalog, _) = merge(
            &scanned(&[("1", 10)]),
            &config_locking(&[]),
            Some(&prior),
            |_: &ScannedFolder| panic!("date should not be derived"),
            now(),
        );
        let ch = find_chapter(&catalog, "1");
        assert_eq!(ch.upload_date, Some(date(2023, 2, 3)));
        assert_eq!(ch.title, "The Beginning");
    }

    #[test]
    fn new_folder_gets_derived_date() {
        let (catalog, _) = merge(
            &scanned(&[("1", 10)]),
            &config_locking(&[]),
            None,
            folder_date,
            now(),
        );
        assert_eq!(find_chapter(&catalog, "1").upload_date, Some(date(2024, 5, 20)));
    }

    #[test]
    fn locked_chapter_backfilled_with_newest_date() {
        let prior = catalog_with(
            &[("1", 0, Some(date(2024, 1, 1))), ("2", 0, Some(date(2024, 3, 9)))],
            0,
        );
        let (catalog, report) = merge(
            &scanned(&[("1", 10), ("2", 10)]),
            &config_locking(&["3"]),
            Some(&prior),
            folder_date,
            now(),
        );
        assert_eq!(find_chapter(&catalog, "3").upload_date, Some(date(2024, 3, 9)));
        assert_eq!(catalog.last_chapter_update, Some(date(2024, 3, 9)));
        let locked = report.chapters.iter().find(|c| c.key == key("3")).unwrap();
        assert_eq!(locked.upload_date, Some(date(2024, 3, 9)));
    }

    #[test]
    fn locked_only_catalog_keeps_null_date() {
        let (catalog, _) = merge(
            &scanned(&[]),
            &config_locking(&["1"]),
            None,
            folder_date,
            now(),
        );
        assert_eq!(find_chapter(&catalog, "1").upload_date, None);
        assert_eq!(catalog.last_chapter_update, None);
    }

    #[test]
    fn series_metadata_prior_wins_config_fills_gaps() {
        let mut prior = catalog_with(&[], 42);
        prior.series.title = Some("Prior Title".into());
        prior.series.author = None;
        prior.series.locked_chapters = vec!["99".into()];

        let (catalog, _) = merge(
            &scanned(&[]),
            &config_locking(&["5"]),
            Some(&prior),
            folder_date,
            now(),
        );
        assert_eq!(catalog.series.title.as_deref(), Some("Prior Title"));
        assert_eq!(catalog.series.author.as_deref(), Some("Config Author"));
        assert_eq!(catalog.series.locked_chapters, vec!["5"]);
        assert_eq!(catalog.series.total_views, 42);
    }

    #[test]
    fn invalid_locked_entries_reported_and_skipped() {
        let (catalog, report) = merge(
            &scanned(&[("1", 1)]),
            &config_locking(&["bonus", "2"]),
            None,
            folder_date,
            now(),
        );
        assert_eq!(chapter_keys(&catalog), vec!["1", "2"]);
        assert_eq!(report.invalid_locked, vec!["bonus"]);
    }

    #[test]
    fn chapter_number_parsed_from_key() {
        let (catalog, _) = merge(
            &scanned(&[("2.1", 1)]),
            &config_locking(&[]),
            None,
            folder_date,
            now(),
        );
        let ch = find_chapter(&catalog, "2.1");
        assert_eq!(ch.chapter_number, 2.1);
        assert_eq!(ch.folder, "2.1");
        assert_eq!(ch.title, "Chapter 2.1");
    }

    #[test]
    fn stamps_schema_and_last_updated() {
        let prior = catalog_with(&[], 0);
        let (catalog, _) = merge(
            &scanned(&[]),
            &config_locking(&[]),
            Some(&prior),
            folder_date,
            now(),
        );
        assert_eq!(catalog.schema_version, CATALOG_SCHEMA_VERSION);
        assert_eq!(catalog.last_updated, Some(now()));
    }

    #[test]
    fn flush_ids_survive_regeneration() {
        let mut prior = catalog_with(&[("1", 10, None)], 20);
        prior.series.last_flush_id = Some("s1".into());
        prior.chapters.get_mut(&key("1")).unwrap().last_flush_id = Some("c1".into());

        let (catalog, _) = merge(
            &scanned(&[("1", 3)]),
            &config_locking(&[]),
            Some(&prior),
            folder_date,
            now(),
        );
        assert_eq!(catalog.series.last_flush_id.as_deref(), Some("s1"));
        assert_eq!(find_chapter(&catalog, "1").last_flush_id.as_deref(), Some("c1"));
    }
}
