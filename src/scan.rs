//! Chapter folder discovery.
//!
//! The content root holds one directory per published chapter, named by its
//! chapter key:
//!
//! ```text
//! site/
//! ├── manga-config.json
//! ├── manga.json
//! ├── 1/                      # Chapter 1
//! │   ├── manifest.json       # Page list (see cipher)
//! │   ├── 001.jpg
//! │   └── 002.webp
//! ├── 2/
//! ├── 2.1/                    # Extra chapter between 2 and 3
//! ├── .git/                   # Hidden = ignored
//! └── assets/                 # Not a chapter key = ignored
//! ```
//!
//! ## Page count
//!
//! Files directly inside a chapter folder whose extension (case-insensitive)
//! is in the configured allow-list. Subdirectories and other files are not
//! counted.
//!
//! ## Upload date
//!
//! First available wins:
//!
//! 1. Earliest commit touching the folder ([`VersionHistory`])
//! 2. Folder modification time
//! 3. Today
//!
//! ## Failure handling
//!
//! Scanning never fails. An unreadable root yields no chapters; an unreadable
//! chapter folder yields a page count of zero. Both are logged.

use crate::history::VersionHistory;
use crate::naming::ChapterKey;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A chapter folder found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFolder {
    pub path: PathBuf,
    pub page_count: u32,
}

/// All chapter folders under a root, in numeric key order.
pub type ScannedChapters = BTreeMap<ChapterKey, ScannedFolder>;

/// Scan `root` for chapter folders and count their pages.
pub fn scan(root: &Path, image_extensions: &[String]) -> ScannedChapters {
    let mut chapters = ScannedChapters::new();

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                root = %root.display(),
                error = %e,
                "cannot read content root, no chapters found"
            );
            return chapters;
        }
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(key) = ChapterKey::parse(&name) else {
            debug!(folder = %name, "skipping non-chapter directory");
            continue;
        };
        let page_count = count_pages(&path, image_extensions);
        chapters.insert(key, ScannedFolder { path, page_count });
    }

    chapters
}

/// Count image files directly inside `folder`.
fn count_pages(folder: &Path, image_extensions: &[String]) -> u32 {
    match fs::read_dir(folder) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_image(p, image_extensions))
            .count() as u32,
        Err(e) => {
            warn!(
                folder = %folder.display(),
                error = %e,
                "cannot read chapter folder, counting 0 pages"
            );
            0
        }
    }
}

fn is_image(path: &Path, image_extensions: &[String]) -> bool {
    if !path.is_file() {
        return false;
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    image_extensions.iter().any(|allowed| *allowed == ext)
}

/// Derive a folder's upload date: first commit, then mtime, then `now`.
pub fn upload_date(folder: &Path, history: &dyn VersionHistory, now: DateTime<Utc>) -> NaiveDate {
    if let Some(first) = history.first_change(folder) {
        return first.date_naive();
    }
    match fs::metadata(folder).and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified).date_naive(),
        Err(e) => {
            debug!(folder = %folder.display(), error = %e, "no mtime, using today");
            now.date_naive()
        }
    }
}
