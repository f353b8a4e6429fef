//! Shared test utilities for the manga-sync test suite.
//!
//! Fixture builders lay out a throwaway site directory, and lookup helpers
//! give clear panics when an expected chapter is missing.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = setup_site(r#"{"title": "T", "lockedChapters": ["3"]}"#);
//! add_chapter(site.path(), "1", 12);
//! add_chapter(site.path(), "2", 9);
//!
//! let catalog = catalog_with(&[("1", 40, Some(date(2024, 1, 2)))], 120);
//! assert_eq!(find_chapter(&catalog, "1").views, 40);
//! ```

use crate::naming::ChapterKey;
use crate::types::{
    Accumulator, CATALOG_SCHEMA_VERSION, Catalog, ChapterRecord, PendingChapters, Series,
};
use chrono::NaiveDate;
use serde_json::Map;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =========================================================================
// Fixture setup
// =========================================================================

/// Temp site directory containing only `manga-config.json`.
pub fn setup_site(series_config: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("manga-config.json"), series_config).unwrap();
    tmp
}

/// Create a chapter folder holding `pages` numbered jpg files.
pub fn add_chapter(root: &Path, name: &str, pages: usize) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    for i in 1..=pages {
        fs::write(dir.join(format!("{i:03}.jpg")), b"jpg").unwrap();
    }
    dir
}

/// Write `value` as pretty JSON to `root/name`.
pub fn write_json(root: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

/// Parse `path` as a JSON value.
pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

// =========================================================================
// Builders
// =========================================================================

pub fn key(s: &str) -> ChapterKey {
    ChapterKey::parse(s).unwrap_or_else(|| panic!("'{s}' is not a chapter key"))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Catalog with the given `(key, views, upload_date)` chapters.
pub fn catalog_with(chapters: &[(&str, u64, Option<NaiveDate>)], total_views: u64) -> Catalog {
    let chapters = chapters
        .iter()
        .map(|(k, views, upload_date)| {
            let k = key(k);
            let record = ChapterRecord {
                views: *views,
                upload_date: *upload_date,
                ..ChapterRecord::new(&k)
            };
            (k, record)
        })
        .collect();
    Catalog {
        schema_version: CATALOG_SCHEMA_VERSION,
        series: Series {
            title: Some("Test Series".into()),
            total_views,
            ..Default::default()
        },
        chapters,
        last_updated: None,
        last_chapter_update: None,
        extra: Map::new(),
    }
}

/// Per-chapter pending file with the given `(key, pending_views)` entries.
pub fn pending_with(entries: &[(&str, u64)]) -> PendingChapters {
    PendingChapters {
        chapters: entries
            .iter()
            .map(|(k, views)| {
                (
                    key(k),
                    Accumulator {
                        pending_views: *views,
                        ..Default::default()
                    },
                )
            })
            .collect(),
        ..Default::default()
    }
}

// =========================================================================
// Lookups (panic with a clear message on miss)
// =========================================================================

/// Find a chapter by key. Panics if not found.
pub fn find_chapter<'a>(catalog: &'a Catalog, k: &str) -> &'a ChapterRecord {
    catalog.chapters.get(&key(k)).unwrap_or_else(|| {
        panic!("chapter '{k}' not found. Available: {:?}", chapter_keys(catalog))
    })
}

/// Chapter keys in catalog order.
pub fn chapter_keys(catalog: &Catalog) -> Vec<&str> {
    catalog.chapters.keys().map(ChapterKey::as_str).collect()
}
