//! Public chapter feed (`chapters.json`).
//!
//! The catalog keys chapters by id; the site's "latest releases" list wants a
//! flat array, newest upload first. The order comes from two stable sorts
//! applied in sequence, not one composite key:
//!
//! 1. by chapter number (ascending, or descending with
//!    [`TieOrder::Descending`])
//! 2. by upload date, newest first, undated chapters last
//!
//! Because pass 2 is stable, chapters sharing an upload date keep the order
//! pass 1 gave them.

use crate::config::TieOrder;
use crate::types::{Catalog, ChapterRecord};
use chrono::NaiveDate;
use std::cmp::Ordering;

/// Flatten and order the catalog's chapters for the public feed.
///
/// Flush bookkeeping (`lastFlushId`) is stripped from the projected records.
pub fn project(catalog: &Catalog, tie_order: TieOrder) -> Vec<ChapterRecord> {
    let mut records: Vec<ChapterRecord> = catalog
        .chapters
        .values()
        .map(|c| ChapterRecord {
            last_flush_id: None,
            ..c.clone()
        })
        .collect();

    records.sort_by(|a, b| {
        let ord = a.chapter_number.total_cmp(&b.chapter_number);
        match tie_order {
            TieOrder::Ascending => ord,
            TieOrder::Descending => ord.reverse(),
        }
    });
    records.sort_by(|a, b| newest_first(a.upload_date, b.upload_date));
    records
}

fn newest_first(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
