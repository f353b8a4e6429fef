//! Persisted JSON shapes shared by every command.
//!
//! These types are read and written by independent, short-lived invocations
//! and by whatever front end serves the site, so parsing is tolerant:
//!
//! - unknown fields are kept in a flattened `extra` map and written back
//!   verbatim
//! - missing optional fields take their defaults
//! - legacy key names from earlier catalog versions are accepted on read
//!   (`manga` → `series`, `views` → `totalViews`, `pages` → `pageCount`)
//!
//! New files are always written with the current names and
//! [`CATALOG_SCHEMA_VERSION`].

use crate::naming::ChapterKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Schema version written into new catalogs and pending files.
pub const CATALOG_SCHEMA_VERSION: u32 = 2;

/// Files written before the version field existed.
fn legacy_schema_version() -> u32 {
    1
}

/// Root of `manga.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    #[serde(alias = "manga")]
    pub series: Series,
    #[serde(default)]
    pub chapters: BTreeMap<ChapterKey, ChapterRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "upload_date_format"
    )]
    pub last_chapter_update: Option<NaiveDate>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Catalog {
    /// Sum of all chapter view counts, saturating at `u64::MAX`.
    pub fn chapter_views(&self) -> u64 {
        self.chapters.values().map(|c| c.views).fold(0, u64::saturating_add)
    }
}

/// Series-level metadata.
///
/// Everything except `total_views` and `locked_chapters` is opaque display
/// data copied from the series configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_format: Option<String>,
    #[serde(default, alias = "views")]
    pub total_views: u64,
    #[serde(default)]
    pub locked_chapters: Vec<String>,
    /// Id of the last series flush applied to `total_views`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One chapter in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chapter_number: f64,
    #[serde(default)]
    pub folder: String,
    #[serde(default, alias = "pages")]
    pub page_count: u32,
    #[serde(default, with = "upload_date_format")]
    pub upload_date: Option<NaiveDate>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub views: u64,
    /// Id of the last chapter flush applied to `views`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChapterRecord {
    /// A record with default title, zero pages and zero views.
    pub fn new(key: &ChapterKey) -> Self {
        Self {
            title: default_chapter_title(key),
            chapter_number: key.number(),
            folder: key.as_str().to_string(),
            page_count: 0,
            upload_date: None,
            locked: false,
            views: 0,
            last_flush_id: None,
            extra: Map::new(),
        }
    }
}

pub fn default_chapter_title(key: &ChapterKey) -> String {
    format!("Chapter {key}")
}

/// A pending view counter, either global or per chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accumulator {
    #[serde(default)]
    pub pending_views: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_increment: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Views taken out of `pending_views` by a flush that has not yet been
    /// confirmed in the catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlight>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Accumulator {
    /// A fresh zeroed counter stamped with `now`.
    pub fn zeroed(now: DateTime<Utc>) -> Self {
        Self {
            pending_views: 0,
            last_increment: Some(now),
            last_update: Some(now),
            in_flight: None,
            extra: Map::new(),
        }
    }
}

/// Write-ahead record of a flush in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub id: String,
    pub views: u64,
}

/// Root of `pending-chapter-views.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChapters {
    #[serde(default = "legacy_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub chapters: BTreeMap<ChapterKey, Accumulator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for PendingChapters {
    fn default() -> Self {
        Self {
            schema_version: CATALOG_SCHEMA_VERSION,
            chapters: BTreeMap::new(),
            last_updated: None,
            extra: Map::new(),
        }
    }
}

/// Upload dates are written as `YYYY-MM-DD`.
///
/// On read, full RFC 3339 timestamps are also accepted (their UTC date is
/// kept), and anything unparseable reads as `None` rather than failing the
/// whole file.
mod upload_date_format {
    use chrono::{DateTime, NaiveDate};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => serializer.serialize_str(&d.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse))
    }

    pub(super) fn parse(s: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(s, FORMAT)
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.to_utc().date_naive()))
    }
}
