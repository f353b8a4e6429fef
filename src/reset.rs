//! Zero every view counter.
//!
//! Used when a site is relaunched or its counters were polluted. The catalog
//! keeps its chapters and metadata; only view totals and pending counters go
//! back to zero. Any flush left in flight is discarded with them.
//!
//! Callers must hold the catalog lock, then both pending-file locks.

use crate::store::{Loaded, StoreError, load_json, write_json_atomic};
use crate::types::{Accumulator, Catalog, PendingChapters};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;

/// The word an operator must type to confirm a reset.
pub const CONFIRMATION: &str = "RESET";

pub fn confirmed(answer: &str) -> bool {
    answer.trim_end_matches(['\r', '\n']) == CONFIRMATION
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    /// Series total and chapter views discarded, when the catalog existed.
    pub catalog: Option<(u64, u64)>,
    pub series_pending: u64,
    /// Per-chapter pending views discarded, when that file existed.
    pub chapter_pending: Option<u64>,
    pub skipped: Vec<PathBuf>,
}

pub fn reset_catalog(catalog: &mut Catalog, now: DateTime<Utc>) -> (u64, u64) {
    let cleared = (catalog.series.total_views, catalog.chapter_views());
    catalog.series.total_views = 0;
    for chapter in catalog.chapters.values_mut() {
        chapter.views = 0;
    }
    catalog.last_updated = Some(now);
    cleared
}

/// Zero `acc`, dropping any in-flight views. Returns the views discarded.
pub fn reset_accumulator(acc: &mut Accumulator, now: DateTime<Utc>) -> u64 {
    let in_flight = acc.in_flight.take().map_or(0, |f| f.views);
    let cleared = acc.pending_views.saturating_add(in_flight);
    acc.pending_views = 0;
    acc.last_update = Some(now);
    cleared
}

pub fn reset_pending_chapters(pending: &mut PendingChapters, now: DateTime<Utc>) -> u64 {
    let cleared = pending
        .chapters
        .values_mut()
        .map(|acc| reset_accumulator(acc, now))
        .fold(0, u64::saturating_add);
    pending.last_updated = Some(now);
    cleared
}

/// Reset all three state files. Missing files are skipped, except the series
/// pending file which is recreated zeroed. Corrupt files are errors.
pub fn reset_files(
    catalog_path: &Path,
    series_pending_path: &Path,
    chapter_pending_path: &Path,
    now: DateTime<Utc>,
) -> Result<ResetReport, StoreError> {
    let mut report = ResetReport::default();

    if let Some(mut catalog) = load_existing::<Catalog>(catalog_path, &mut report)? {
        report.catalog = Some(reset_catalog(&mut catalog, now));
        write_json_atomic(catalog_path, &catalog)?;
    }

    let mut acc = match load_json::<Accumulator>(series_pending_path)? {
        Loaded::Present(acc) => acc,
        Loaded::Missing => Accumulator::zeroed(now),
        Loaded::Corrupt(source) => return Err(corrupt(series_pending_path, source)),
    };
    report.series_pending = reset_accumulator(&mut acc, now);
    acc.last_increment = Some(now);
    write_json_atomic(series_pending_path, &acc)?;

    let chapter_pending = load_existing::<PendingChapters>(chapter_pending_path, &mut report)?;
    if let Some(mut pending) = chapter_pending {
        report.chapter_pending = Some(reset_pending_chapters(&mut pending, now));
        write_json_atomic(chapter_pending_path, &pending)?;
    }

    Ok(report)
}

fn load_existing<T: serde::de::DeserializeOwned>(
    path: &Path,
    report: &mut ResetReport,
) -> Result<Option<T>, StoreError> {
    match load_json(path)? {
        Loaded::Present(value) => Ok(Some(value)),
        Loaded::Missing => {
            warn!(path = %path.display(), "not found, skipping");
            report.skipped.push(path.to_path_buf());
            Ok(None)
        }
        Loaded::Corrupt(source) => Err(corrupt(path, source)),
    }
}

fn corrupt(path: &Path, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.to_path_buf(),
        source,
    }
}
