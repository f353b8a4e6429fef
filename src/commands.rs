//! One function per CLI operation.
//!
//! Each command loads what it needs, takes the locks for its read-modify-write
//! span, calls into the core modules, persists, and returns a report for
//! [`crate::output`]. Locks are always taken in the same order (catalog,
//! series pending, chapter pending) so concurrent invocations cannot deadlock.
//!
//! The public feed is derived from the catalog, so every command that writes
//! the catalog rewrites `chapters.json` while still holding the catalog lock.

use crate::cipher::{self, CipherError, Discovery, ManifestOutcome, Selection};
use crate::config::{self, AutomationConfig, ConfigError, CorruptPolicy, ResolvedPaths};
use crate::feed;
use crate::flush::{self, FlushError, FlushReport};
use crate::history::{GitHistory, NoHistory, VersionHistory};
use crate::merge::{self, MergeReport};
use crate::naming::ChapterKey;
use crate::pending;
use crate::reset::{self, ResetReport};
use crate::scan;
use crate::store::{self, FileLock, Loaded, StoreError};
use crate::types::{Accumulator, Catalog, PendingChapters};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Flush(#[from] FlushError),
    #[error("{path} is corrupt and catalog.on_corrupt = \"fail\": {source}")]
    CorruptCatalog {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A site directory plus its automation settings.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub settings: AutomationConfig,
    pub paths: ResolvedPaths,
}

impl Workspace {
    /// Load settings from `settings` (relative to `root` unless absolute).
    pub fn load(root: &Path, settings: &Path) -> Result<Self, CommandError> {
        let settings = config::load_automation_config(&root.join(settings))?;
        Ok(Self::with_settings(root, settings))
    }

    pub fn with_settings(root: &Path, settings: AutomationConfig) -> Self {
        let paths = settings.paths.resolve(root);
        Self {
            root: root.to_path_buf(),
            settings,
            paths,
        }
    }

    fn history(&self) -> Box<dyn VersionHistory> {
        if self.settings.history.use_git {
            Box::new(GitHistory::new(&self.root, self.settings.history.timeout()))
        } else {
            Box::new(NoHistory)
        }
    }

    fn lock(&self, target: &Path) -> Result<FileLock, StoreError> {
        store::lock(target, self.settings.locking.timeout())
    }

    /// Project `catalog` into the feed file. Returns the entry count.
    fn write_feed(&self, catalog: &Catalog) -> Result<usize, StoreError> {
        let records = feed::project(catalog, self.settings.feed.tie_order);
        store::write_json_atomic(&self.paths.chapter_feed, &records)?;
        Ok(records.len())
    }
}

// =============================================================================
// generate
// =============================================================================

#[derive(Debug)]
pub struct GenerateReport {
    pub merge: MergeReport,
    pub catalog_path: PathBuf,
    pub feed_path: PathBuf,
    pub feed_entries: usize,
    /// Where a corrupt prior catalog was copied before being replaced.
    pub corrupt_backup: Option<PathBuf>,
}

/// Regenerate `manga.json` from the chapter folders and rewrite the feed.
pub fn generate(ws: &Workspace, now: DateTime<Utc>) -> Result<GenerateReport, CommandError> {
    let series_config = config::load_series_config(&ws.paths.series_config)?;
    let catalog_path = &ws.paths.catalog;
    let _catalog_lock = ws.lock(catalog_path)?;

    let mut corrupt_backup = None;
    let prior = match store::load_json::<Catalog>(catalog_path)? {
        Loaded::Present(catalog) => Some(catalog),
        Loaded::Missing => None,
        Loaded::Corrupt(source) => match ws.settings.catalog.on_corrupt {
            CorruptPolicy::Fail => {
                return Err(CommandError::CorruptCatalog {
                    path: catalog_path.clone(),
                    source,
                });
            }
            CorruptPolicy::Reset => {
                let backup = store::backup_corrupt(catalog_path, now)?;
                warn!(
                    path = %catalog_path.display(),
                    backup = %backup.display(),
                    error = %source,
                    "catalog is corrupt, regenerating from scratch; ALL VIEW COUNTS RESET TO 0"
                );
                corrupt_backup = Some(backup);
                None
            }
        },
    };

    let scanned = scan::scan(&ws.paths.content_root, &series_config.image_extensions());
    let history = ws.history();
    let (catalog, merge_report) = merge::merge(
        &scanned,
        &series_config,
        prior.as_ref(),
        |folder| scan::upload_date(&folder.path, history.as_ref(), now),
        now,
    );

    store::write_json_atomic(catalog_path, &catalog)?;
    let feed_entries = ws.write_feed(&catalog)?;
    info!(
        chapters = catalog.chapters.len(),
        first_time = merge_report.first_time,
        "catalog generated"
    );

    Ok(GenerateReport {
        merge: merge_report,
        catalog_path: catalog_path.clone(),
        feed_path: ws.paths.chapter_feed.clone(),
        feed_entries,
        corrupt_backup,
    })
}

// =============================================================================
// sync
// =============================================================================

#[derive(Debug, Default)]
pub struct SyncReport {
    pub catalog_chapters: usize,
    pub added: Vec<ChapterKey>,
    pub chapter_pending_written: bool,
    pub series_pending_created: bool,
    pub corrupt_backups: Vec<PathBuf>,
}

/// Give every catalog chapter a pending counter and make sure the series
/// counter file exists.
pub fn sync(ws: &Workspace, now: DateTime<Utc>) -> Result<SyncReport, CommandError> {
    let _catalog_lock = ws.lock(&ws.paths.catalog)?;
    let _series_lock = ws.lock(&ws.paths.pending_views)?;
    let _chapters_lock = ws.lock(&ws.paths.pending_chapter_views)?;

    let catalog: Catalog = store::read_required(&ws.paths.catalog)?;
    let mut report = SyncReport {
        catalog_chapters: catalog.chapters.len(),
        ..Default::default()
    };

    let loaded =
        load_or_recover::<PendingChapters>(&ws.paths.pending_chapter_views, now, &mut report)?;
    let (mut pending, mut must_write) = match loaded {
        Some(p) => (p, false),
        None => (PendingChapters::default(), true),
    };
    report.added = pending::sync(catalog.chapters.keys(), &mut pending, now);
    must_write |= !report.added.is_empty();
    if must_write {
        pending.last_updated = Some(now);
        store::write_json_atomic(&ws.paths.pending_chapter_views, &pending)?;
        report.chapter_pending_written = true;
    }

    if load_or_recover::<Accumulator>(&ws.paths.pending_views, now, &mut report)?.is_none() {
        store::write_json_atomic(&ws.paths.pending_views, &Accumulator::zeroed(now))?;
        report.series_pending_created = true;
    }

    Ok(report)
}

/// Load a pending file. A corrupt file is backed up and treated as missing.
fn load_or_recover<T: serde::de::DeserializeOwned>(
    path: &Path,
    now: DateTime<Utc>,
    report: &mut SyncReport,
) -> Result<Option<T>, StoreError> {
    match store::load_json(path)? {
        Loaded::Present(value) => Ok(Some(value)),
        Loaded::Missing => Ok(None),
        Loaded::Corrupt(source) => {
            let backup = store::backup_corrupt(path, now)?;
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %source,
                "pending file is corrupt, recreating"
            );
            report.corrupt_backups.push(backup);
            Ok(None)
        }
    }
}

// =============================================================================
// flushes
// =============================================================================

/// Move pending series views into `totalViews` once the threshold is met.
pub fn flush_series(ws: &Workspace, now: DateTime<Utc>) -> Result<FlushReport, CommandError> {
    let _catalog_lock = ws.lock(&ws.paths.catalog)?;
    let _pending_lock = ws.lock(&ws.paths.pending_views)?;
    let report = flush::flush_series(
        &ws.paths.catalog,
        &ws.paths.pending_views,
        ws.settings.thresholds.series_views,
        now,
    )?;
    refresh_feed(ws, &report)?;
    Ok(report)
}

/// Move each chapter's pending views into its `views` once the threshold is met.
pub fn flush_chapters(ws: &Workspace, now: DateTime<Utc>) -> Result<FlushReport, CommandError> {
    let _catalog_lock = ws.lock(&ws.paths.catalog)?;
    let _pending_lock = ws.lock(&ws.paths.pending_chapter_views)?;
    let report = flush::flush_chapters(
        &ws.paths.catalog,
        &ws.paths.pending_chapter_views,
        ws.settings.thresholds.chapter_views,
        now,
    )?;
    refresh_feed(ws, &report)?;
    Ok(report)
}

fn refresh_feed(ws: &Workspace, report: &FlushReport) -> Result<(), StoreError> {
    if report.catalog_written {
        let catalog: Catalog = store::read_required(&ws.paths.catalog)?;
        ws.write_feed(&catalog)?;
    }
    Ok(())
}

// =============================================================================
// feed
// =============================================================================

#[derive(Debug)]
pub struct FeedReport {
    pub path: PathBuf,
    pub entries: usize,
}

/// Rewrite `chapters.json` from the current catalog.
pub fn feed(ws: &Workspace) -> Result<FeedReport, CommandError> {
    let _catalog_lock = ws.lock(&ws.paths.catalog)?;
    let catalog: Catalog = store::read_required(&ws.paths.catalog)?;
    let entries = ws.write_feed(&catalog)?;
    Ok(FeedReport {
        path: ws.paths.chapter_feed.clone(),
        entries,
    })
}

// =============================================================================
// encrypt
// =============================================================================

#[derive(Debug)]
pub struct EncryptReport {
    pub discovery: Discovery,
    pub results: Vec<(PathBuf, Result<ManifestOutcome, String>)>,
}

impl EncryptReport {
    pub fn encrypted(&self) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| matches!(r, Ok(ManifestOutcome::Encrypted { .. })))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Encrypt the selected manifests. The secret is checked before anything is
/// read; a failing manifest is logged and the rest are still processed.
pub fn encrypt(ws: &Workspace, selection: Selection<'_>) -> Result<EncryptReport, CommandError> {
    let cipher_settings = &ws.settings.cipher;
    let key = cipher::load_key(&cipher_settings.secret_env)?;

    let history = ws.history();
    let discovery = cipher::discover(
        selection,
        &ws.root,
        &ws.paths.content_root,
        &cipher_settings.manifest_name,
        history.as_ref(),
    );

    let results = discovery
        .manifests
        .iter()
        .map(|path| {
            let result = cipher::encrypt_manifest(
                path,
                &key,
                &cipher_settings.encryption_version,
                ws.settings.locking.timeout(),
            )
            .map_err(|e| {
                warn!(path = %path.display(), error = %e, "could not encrypt manifest");
                e.to_string()
            });
            (path.clone(), result)
        })
        .collect();

    Ok(EncryptReport { discovery, results })
}

// =============================================================================
// reset
// =============================================================================

/// Zero every view counter. Confirmation is the caller's job.
pub fn reset(ws: &Workspace, now: DateTime<Utc>) -> Result<ResetReport, CommandError> {
    let _catalog_lock = ws.lock(&ws.paths.catalog)?;
    let _series_lock = ws.lock(&ws.paths.pending_views)?;
    let _chapters_lock = ws.lock(&ws.paths.pending_chapter_views)?;

    let report = reset::reset_files(
        &ws.paths.catalog,
        &ws.paths.pending_views,
        &ws.paths.pending_chapter_views,
        now,
    )?;
    if report.catalog.is_some() {
        let catalog: Catalog = store::read_required(&ws.paths.catalog)?;
        ws.write_feed(&catalog)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_required;
    use crate::test_helpers::*;
    use crate::types::InFlight;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn workspace(root: &Path) -> Workspace {
        let mut settings = AutomationConfig::default();
        settings.history.use_git = false;
        settings.locking.timeout_ms = 500;
        Workspace::with_settings(root, settings)
    }

    fn site() -> TempDir {
        let tmp = setup_site(r#"{"title": "Example", "lockedChapters": ["3"]}"#);
        add_chapter(tmp.path(), "1", 12);
        add_chapter(tmp.path(), "2", 9);
        tmp
    }

    // =========================================================================
    // generate
    // =========================================================================

    #[test]
    fn generate_first_time_writes_catalog_and_feed() {
        let tmp = site();
        let ws = workspace(tmp.path());

        let report = generate(&ws, now()).unwrap();
        assert!(report.merge.first_time);
        assert_eq!(report.feed_entries, 3);

        let catalog: Catalog = read_required(&ws.paths.catalog).unwrap();
        assert_eq!(chapter_keys(&catalog), vec!["1", "2", "3"]);
        assert_eq!(find_chapter(&catalog, "1").page_count, 12);
        assert!(find_chapter(&catalog, "3").locked);

        let feed = read_json(&ws.paths.chapter_feed);
        assert_eq!(feed.as_array().unwrap().len(), 3);
    }

    #[test]
    fn generate_preserves_views_across_runs() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();

        let mut catalog: Catalog = read_required(&ws.paths.catalog).unwrap();
        catalog.chapters.get_mut(&key("1")).unwrap().views = 77;
        catalog.series.total_views = 500;
        store::write_json_atomic(&ws.paths.catalog, &catalog).unwrap();

        add_chapter(tmp.path(), "3", 5);
        let report = generate(&ws, now()).unwrap();
        assert!(!report.merge.first_time);

        let catalog: Catalog = read_required(&ws.paths.catalog).unwrap();
        assert_eq!(find_chapter(&catalog, "1").views, 77);
        assert_eq!(catalog.series.total_views, 500);
        assert!(!find_chapter(&catalog, "3").locked);
    }

    #[test]
    fn generate_resets_corrupt_catalog_with_backup() {
        let tmp = site();
        let ws = workspace(tmp.path());
        fs::write(&ws.paths.catalog, "{ not json").unwrap();

        let report = generate(&ws, now()).unwrap();
        assert!(report.merge.first_time);
        let backup = report.corrupt_backup.unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), "{ not json");
        assert!(read_required::<Catalog>(&ws.paths.catalog).is_ok());
    }

    #[test]
    fn generate_fail_policy_leaves_corrupt_catalog() {
        let tmp = site();
        let mut ws = workspace(tmp.path());
        ws.settings.catalog.on_corrupt = CorruptPolicy::Fail;
        fs::write(&ws.paths.catalog, "{ not json").unwrap();

        assert!(matches!(
            generate(&ws, now()),
            Err(CommandError::CorruptCatalog { .. })
        ));
        assert_eq!(fs::read_to_string(&ws.paths.catalog).unwrap(), "{ not json");
        assert!(!ws.paths.chapter_feed.exists());
    }

    #[test]
    fn generate_without_series_config_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        add_chapter(tmp.path(), "1", 1);
        let ws = workspace(tmp.path());

        assert!(matches!(
            generate(&ws, now()),
            Err(CommandError::Config(ConfigError::MissingSeriesConfig(_)))
        ));
        assert!(!ws.paths.catalog.exists());
    }

    #[test]
    fn generate_times_out_when_catalog_locked() {
        let tmp = site();
        let ws = workspace(tmp.path());
        let _held = store::lock(&ws.paths.catalog, ws.settings.locking.timeout()).unwrap();

        assert!(matches!(
            generate(&ws, now()),
            Err(CommandError::Store(StoreError::LockTimeout { .. }))
        ));
    }

    // =========================================================================
    // sync
    // =========================================================================

    #[test]
    fn sync_creates_both_pending_files() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();

        let report = sync(&ws, now()).unwrap();
        assert_eq!(report.added.len(), 3);
        assert!(report.chapter_pending_written);
        assert!(report.series_pending_created);

        let acc: Accumulator = read_required(&ws.paths.pending_views).unwrap();
        assert_eq!(acc.pending_views, 0);
        let pending: PendingChapters = read_required(&ws.paths.pending_chapter_views).unwrap();
        assert_eq!(pending.chapters.len(), 3);
    }

    #[test]
    fn second_sync_writes_nothing() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();
        sync(&ws, now()).unwrap();
        let before = fs::read(&ws.paths.pending_chapter_views).unwrap();

        let report = sync(&ws, now()).unwrap();
        assert!(report.added.is_empty());
        assert!(!report.chapter_pending_written);
        assert!(!report.series_pending_created);
        assert_eq!(fs::read(&ws.paths.pending_chapter_views).unwrap(), before);
    }

    #[test]
    fn sync_requires_catalog() {
        let tmp = site();
        let ws = workspace(tmp.path());
        assert!(matches!(
            sync(&ws, now()),
            Err(CommandError::Store(StoreError::Missing(_)))
        ));
    }

    #[test]
    fn sync_recovers_corrupt_pending_file() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();
        fs::write(&ws.paths.pending_chapter_views, "garbage").unwrap();

        let report = sync(&ws, now()).unwrap();
        assert_eq!(report.corrupt_backups.len(), 1);
        assert_eq!(report.added.len(), 3);
        assert!(read_required::<PendingChapters>(&ws.paths.pending_chapter_views).is_ok());
    }

    // =========================================================================
    // flushes
    // =========================================================================

    #[test]
    fn chapter_flush_updates_feed() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();
        let pending = pending_with(&[("2", 15)]);
        store::write_json_atomic(&ws.paths.pending_chapter_views, &pending).unwrap();

        let report = flush_chapters(&ws, now()).unwrap();
        assert_eq!(report.flushed.len(), 1);

        let feed = read_json(&ws.paths.chapter_feed);
        let entry = feed
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["folder"] == "2")
            .unwrap();
        assert_eq!(entry["views"], 15);
        assert!(entry.get("lastFlushId").is_none());
    }

    #[test]
    fn series_flush_waiting_leaves_feed_alone() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();
        fs::remove_file(&ws.paths.chapter_feed).unwrap();
        store::write_json_atomic(
            &ws.paths.pending_views,
            &Accumulator {
                pending_views: 5,
                ..Default::default()
            },
        )
        .unwrap();

        let report = flush_series(&ws, now()).unwrap();
        assert!(report.flushed.is_empty());
        assert!(!ws.paths.chapter_feed.exists());
    }

    #[test]
    fn series_flush_recovers_then_flushes() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();
        store::write_json_atomic(
            &ws.paths.pending_views,
            &Accumulator {
                pending_views: 20,
                in_flight: Some(InFlight {
                    id: "earlier".into(),
                    views: 30,
                }),
                ..Default::default()
            },
        )
        .unwrap();

        let report = flush_series(&ws, now()).unwrap();
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.flushed[0].new_total, 50);
        let catalog: Catalog = read_required(&ws.paths.catalog).unwrap();
        assert_eq!(catalog.series.total_views, 50);
    }

    // =========================================================================
    // reset / feed
    // =========================================================================

    #[test]
    fn reset_zeroes_views_and_rewrites_feed() {
        let tmp = site();
        let ws = workspace(tmp.path());
        generate(&ws, now()).unwrap();
        let pending = pending_with(&[("1", 40)]);
        store::write_json_atomic(&ws.paths.pending_chapter_views, &pending).unwrap();
        flush_chapters(&ws, now()).unwrap();

        let report = reset(&ws, now()).unwrap();
        assert_eq!(report.catalog, Some((0, 40)));
        let feed = read_json(&ws.paths.chapter_feed);
        assert!(feed.as_array().unwrap().iter().all(|e| e["views"] == 0));
    }

    #[test]
    fn feed_command_requires_catalog() {
        let tmp = site();
        let ws = workspace(tmp.path());
        assert!(feed(&ws).is_err());
        generate(&ws, now()).unwrap();
        assert_eq!(feed(&ws).unwrap().entries, 3);
    }

    #[test]
    fn workspace_settings_resolved_against_root() {
        let tmp = site();
        fs::write(
            tmp.path().join("automation.toml"),
            "[paths]\ncatalog = \"data/manga.json\"\n",
        )
        .unwrap();
        let ws = Workspace::load(tmp.path(), Path::new("automation.toml")).unwrap();
        assert_eq!(ws.paths.catalog, tmp.path().join("data/manga.json"));
    }

    #[test]
    fn encrypt_without_secret_fails_before_reading() {
        let tmp = site();
        let mut ws = workspace(tmp.path());
        ws.settings.cipher.secret_env = "MANGA_SYNC_TEST_UNSET_SECRET".into();
        assert!(matches!(
            encrypt(&ws, Selection::All),
            Err(CommandError::Cipher(CipherError::MissingSecret(_)))
        ));
    }
}
