//! Pending view counters.
//!
//! The live site increments counters in two files between flushes:
//! `pending-views.json` (one [`Accumulator`] for the whole series) and
//! `pending-chapter-views.json` (one per chapter). This module only keeps the
//! per-chapter file in step with the catalog; incrementing is done elsewhere
//! and flushing lives in [`crate::flush`].

use crate::naming::ChapterKey;
use crate::types::{Accumulator, PendingChapters};
use chrono::{DateTime, Utc};

/// Add a zeroed accumulator for every catalog key without one.
///
/// Returns the keys that were added. Existing entries, including those for
/// chapters no longer in the catalog, are left exactly as they were.
pub fn sync<'a>(
    catalog_keys: impl IntoIterator<Item = &'a ChapterKey>,
    pending: &mut PendingChapters,
    now: DateTime<Utc>,
) -> Vec<ChapterKey> {
    let mut added = Vec::new();
    for key in catalog_keys {
        if !pending.chapters.contains_key(key) {
            pending.chapters.insert(key.clone(), Accumulator::zeroed(now));
            added.push(key.clone());
        }
    }
    if !added.is_empty() {
        pending.last_updated = Some(now);
    }
    added
}
