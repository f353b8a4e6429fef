//! Chapter-key parsing and ordering.
//!
//! Chapters are identified by the name of their content folder. A valid key is
//! one or more ASCII digits, optionally followed by a dot and one or more
//! digits:
//!
//! - `1`, `2`, `10` → whole chapters
//! - `2.1`, `10.5` → extras and split chapters
//! - `01` → valid; sorts with `1` but stays a distinct key
//! - `2.`, `.5`, `1.2.3`, `v1`, `chapter-1` → not chapters
//!
//! ## Ordering
//!
//! Keys order by their numeric value, never lexicographically: `"2" < "10"`.
//! Keys with the same value (`"1"` and `"01"`) fall back to string order so
//! that `Ord` stays consistent with `Eq`.
//!
//! Keys read back from persisted JSON are not re-validated. A malformed key
//! from an older or hand-edited file still round-trips; it just sorts after
//! every numeric key.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A chapter identifier, doubling as its folder name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterKey(String);

impl ChapterKey {
    /// Parse a folder or config name into a key. Returns `None` when the name
    /// does not follow the chapter grammar.
    pub fn parse(name: &str) -> Option<Self> {
        is_chapter_name(name).then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the key (`"2.1"` → `2.1`).
    ///
    /// Malformed keys loaded from disk evaluate to `f64::INFINITY`.
    pub fn number(&self) -> f64 {
        self.0.parse::<f64>().unwrap_or(f64::INFINITY)
    }
}

impl Ord for ChapterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number()
            .total_cmp(&other.number())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for ChapterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `^\d+(\.\d+)?$`
fn is_chapter_name(name: &str) -> bool {
    let (whole, fraction) = match name.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (name, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(whole) && fraction.is_none_or(all_digits)
}
