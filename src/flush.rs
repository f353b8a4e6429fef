//! Threshold flushes from pending counters into the catalog.
//!
//! Two flushes share one protocol: the series flush moves
//! `pending-views.json` into `series.totalViews`, and the chapter flush moves
//! each entry of `pending-chapter-views.json` into that chapter's `views`.
//! A counter below its threshold is left alone and keeps accumulating.
//!
//! ## Write-ahead protocol
//!
//! Two files change in one flush and neither write can be undone, so the
//! pending file doubles as a write-ahead log:
//!
//! 1. Recover: finish any flush a previous run left in flight.
//! 2. Move each due counter into `inFlight {id, views}`, zero it, write the
//!    pending file.
//! 3. Add the in-flight views to the catalog, stamp `lastFlushId = id`, write
//!    the catalog.
//! 4. Clear `inFlight`, write the pending file.
//!
//! Recovery looks at the target's `lastFlushId`. If it already equals the
//! in-flight id the catalog write landed and only step 4 is left; otherwise
//! steps 3 and 4 are replayed. A crash between any two writes therefore
//! neither drops nor double counts views.
//!
//! Callers must hold the catalog lock and then the pending-file lock for the
//! whole call.

use crate::naming::ChapterKey;
use crate::store::{StoreError, read_required, write_json_atomic};
use crate::types::{Accumulator, Catalog, InFlight, PendingChapters};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum FlushError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{target}: adding {views} views to {total} overflows the counter")]
    Overflow {
        target: Target,
        total: u64,
        views: u64,
    },
}

/// What a counter flushes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Series,
    Chapter(ChapterKey),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Series => f.write_str("series"),
            Target::Chapter(key) => write!(f, "chapter {key}"),
        }
    }
}

/// A flush left in flight by an earlier run and finished by this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub target: Target,
    pub views: u64,
    /// The catalog already had the views; only the pending file was cleaned.
    pub already_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flushed {
    pub target: Target,
    pub views: u64,
    pub new_total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waiting {
    pub target: Target,
    pub pending: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub threshold: u64,
    pub recovered: Vec<Recovered>,
    pub flushed: Vec<Flushed>,
    pub waiting: Vec<Waiting>,
    /// Pending chapters with no catalog record.
    pub unknown: Vec<ChapterKey>,
    pub catalog_written: bool,
}

/// Random id tying an in-flight record to the catalog write that applies it.
pub fn new_flush_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Move `acc.pending_views` into a fresh in-flight record when it has reached
/// `threshold`. Returns the in-flight record, or `None` if still waiting.
pub fn begin(acc: &mut Accumulator, threshold: u64, now: DateTime<Utc>) -> Option<InFlight> {
    if acc.pending_views < threshold {
        return None;
    }
    let in_flight = InFlight {
        id: new_flush_id(),
        views: acc.pending_views,
    };
    acc.pending_views = 0;
    acc.last_update = Some(now);
    acc.in_flight = Some(in_flight.clone());
    Some(in_flight)
}

/// `total + views`, or an overflow error naming `target`.
fn add_views(target: &Target, total: u64, views: u64) -> Result<u64, FlushError> {
    total.checked_add(views).ok_or_else(|| FlushError::Overflow {
        target: target.clone(),
        total,
        views,
    })
}

// =============================================================================
// Series
// =============================================================================

/// Flush `pending-views.json` into the catalog's series total.
///
/// Totals are computed in memory before anything is written, so a counter
/// that would overflow fails the flush with both files untouched.
pub fn flush_series(
    catalog_path: &Path,
    pending_path: &Path,
    threshold: u64,
    now: DateTime<Utc>,
) -> Result<FlushReport, FlushError> {
    let mut catalog: Catalog = read_required(catalog_path)?;
    let mut acc: Accumulator = read_required(pending_path)?;
    let mut report = FlushReport {
        threshold,
        ..Default::default()
    };

    if let Some(in_flight) = acc.in_flight.take() {
        let already_applied = catalog.series.last_flush_id.as_deref() == Some(&in_flight.id);
        if !already_applied {
            apply_series(&mut catalog, &in_flight, now)?;
            write_json_atomic(catalog_path, &catalog)?;
            report.catalog_written = true;
        }
        write_json_atomic(pending_path, &acc)?;
        info!(views = in_flight.views, already_applied, "recovered interrupted series flush");
        report.recovered.push(Recovered {
            target: Target::Series,
            views: in_flight.views,
            already_applied,
        });
    }

    let Some(in_flight) = begin(&mut acc, threshold, now) else {
        debug!(pending = acc.pending_views, threshold, "series below threshold");
        report.waiting.push(Waiting {
            target: Target::Series,
            pending: acc.pending_views,
        });
        return Ok(report);
    };
    let new_total = apply_series(&mut catalog, &in_flight, now)?;

    write_json_atomic(pending_path, &acc)?;
    write_json_atomic(catalog_path, &catalog)?;
    report.catalog_written = true;

    acc.in_flight = None;
    write_json_atomic(pending_path, &acc)?;

    report.flushed.push(Flushed {
        target: Target::Series,
        views: in_flight.views,
        new_total,
    });
    Ok(report)
}

fn apply_series(
    catalog: &mut Catalog,
    in_flight: &InFlight,
    now: DateTime<Utc>,
) -> Result<u64, FlushError> {
    let total = add_views(&Target::Series, catalog.series.total_views, in_flight.views)?;
    catalog.series.total_views = total;
    catalog.series.last_flush_id = Some(in_flight.id.clone());
    catalog.last_updated = Some(now);
    Ok(total)
}

// =============================================================================
// Chapters
// =============================================================================

/// Flush every due entry of `pending-chapter-views.json` into its chapter.
pub fn flush_chapters(
    catalog_path: &Path,
    pending_path: &Path,
    threshold: u64,
    now: DateTime<Utc>,
) -> Result<FlushReport, FlushError> {
    let mut catalog: Catalog = read_required(catalog_path)?;
    let mut pending: PendingChapters = read_required(pending_path)?;
    let mut report = FlushReport {
        threshold,
        ..Default::default()
    };

    if recover_chapters(&mut catalog, &mut pending, now, &mut report)? {
        if report.catalog_written {
            write_json_atomic(catalog_path, &catalog)?;
        }
        write_json_atomic(pending_path, &pending)?;
    }

    let mut due = Vec::new();
    for (key, acc) in pending.chapters.iter_mut() {
        let Some(chapter) = catalog.chapters.get_mut(key) else {
            warn!(chapter = %key, "pending views for chapter not in catalog, skipping");
            report.unknown.push(key.clone());
            continue;
        };
        let target = Target::Chapter(key.clone());
        let Some(in_flight) = begin(acc, threshold, now) else {
            report.waiting.push(Waiting {
                target,
                pending: acc.pending_views,
            });
            continue;
        };
        let new_total = add_views(&target, chapter.views, in_flight.views)?;
        chapter.views = new_total;
        chapter.last_flush_id = Some(in_flight.id);
        report.flushed.push(Flushed {
            target,
            views: in_flight.views,
            new_total,
        });
        due.push(key.clone());
    }
    if due.is_empty() {
        debug!(threshold, "no chapter reached threshold");
        return Ok(report);
    }

    pending.last_updated = Some(now);
    write_json_atomic(pending_path, &pending)?;

    catalog.last_updated = Some(now);
    write_json_atomic(catalog_path, &catalog)?;
    report.catalog_written = true;

    for key in &due {
        if let Some(acc) = pending.chapters.get_mut(key) {
            acc.in_flight = None;
        }
    }
    write_json_atomic(pending_path, &pending)?;
    Ok(report)
}

/// Finish in-flight chapter flushes in memory. Returns whether the pending
/// file changed and must be written. Sets `catalog_written` when the catalog
/// was modified and must be written before the pending file.
///
/// Views in flight for a chapter that has since left the catalog go back into
/// its pending counter.
fn recover_chapters(
    catalog: &mut Catalog,
    pending: &mut PendingChapters,
    now: DateTime<Utc>,
    report: &mut FlushReport,
) -> Result<bool, FlushError> {
    let mut pending_dirty = false;
    for (key, acc) in pending.chapters.iter_mut() {
        let Some(in_flight) = acc.in_flight.take() else {
            continue;
        };
        pending_dirty = true;
        let target = Target::Chapter(key.clone());
        let already_applied = match catalog.chapters.get_mut(key) {
            Some(chapter) if chapter.last_flush_id.as_deref() == Some(&in_flight.id) => true,
            Some(chapter) => {
                chapter.views = add_views(&target, chapter.views, in_flight.views)?;
                chapter.last_flush_id = Some(in_flight.id.clone());
                catalog.last_updated = Some(now);
                report.catalog_written = true;
                false
            }
            None => {
                warn!(
                    chapter = %key,
                    views = in_flight.views,
                    "in-flight views for chapter not in catalog, returning to pending"
                );
                acc.pending_views = add_views(&target, acc.pending_views, in_flight.views)?;
                continue;
            }
        };
        info!(
            chapter = %key,
            views = in_flight.views,
            already_applied,
            "recovered interrupted chapter flush"
        );
        report.recovered.push(Recovered {
            target,
            views: in_flight.views,
            already_applied,
        });
    }
    Ok(pending_dirty)
}
