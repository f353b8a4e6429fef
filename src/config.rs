//! Configuration loading.
//!
//! Two independent inputs drive every command:
//!
//! ## Series configuration (`manga-config.json`, required)
//!
//! Display metadata for the series, the chapters that are announced but not
//! yet published (`lockedChapters`), and optionally the image extensions that
//! count as pages. This is the file the site owner edits by hand. It is loaded
//! once per invocation; a missing or malformed file is fatal.
//!
//! ```json
//! {
//!   "title": "Example Series",
//!   "author": "Someone",
//!   "repoOwner": "someone",
//!   "repoName": "example-series",
//!   "lockedChapters": ["12", "12.5"],
//!   "imageExtensions": ["jpg", "jpeg", "png", "webp"]
//! }
//! ```
//!
//! ## Automation settings (`automation.toml`, optional)
//!
//! Operational knobs: file locations, flush thresholds, lock timeouts, git
//! usage. Stock defaults apply when the file is absent. A present file is
//! sparse, so it only needs the keys it overrides:
//!
//! ```toml
//! [thresholds]
//! chapter_views = 25
//! ```
//!
//! Unknown keys are rejected to catch typos early. Run `manga-sync gen-config`
//! for a fully commented stock file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Series config not found: {0}")]
    MissingSeriesConfig(PathBuf),
    #[error("Series config {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Image extensions counted as pages when the series config names none.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

// =============================================================================
// Series configuration (JSON)
// =============================================================================

/// Contents of `manga-config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesConfig {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub alternative_title: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub genre: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub links: Option<Value>,
    #[serde(default)]
    pub repo_owner: Option<String>,
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub image_prefix: Option<String>,
    #[serde(default)]
    pub image_format: Option<String>,
    #[serde(default)]
    pub locked_chapters: Vec<String>,
    #[serde(default)]
    pub image_extensions: Option<Vec<String>>,
}

impl SeriesConfig {
    /// Raw-file base URL derived from the repository coordinates.
    pub fn repo_url(&self) -> Option<String> {
        match (&self.repo_owner, &self.repo_name) {
            (Some(owner), Some(name)) => Some(format!(
                "https://raw.githubusercontent.com/{owner}/{name}/main/"
            )),
            _ => None,
        }
    }

    /// Lower-cased page extensions without leading dots.
    pub fn image_extensions(&self) -> Vec<String> {
        match &self.image_extensions {
            Some(exts) if !exts.is_empty() => exts
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            _ => DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

/// Load the series configuration. Any failure is fatal to the caller.
pub fn load_series_config(path: &Path) -> Result<SeriesConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingSeriesConfig(path.to_path_buf()));
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// Automation settings (TOML)
// =============================================================================

/// Operational settings loaded from `automation.toml`.
///
/// All fields have defaults matching the long-standing behaviour of the
/// automation (thresholds 20 and 10, files in the working directory).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutomationConfig {
    /// Where the state files live.
    pub paths: PathsConfig,
    /// Flush thresholds.
    pub thresholds: ThresholdsConfig,
    /// Cross-process locking.
    pub locking: LockingConfig,
    /// Version-control lookups.
    pub history: HistoryConfig,
    /// Catalog regeneration policy.
    pub catalog: CatalogConfig,
    /// Public chapter feed ordering.
    pub feed: FeedConfig,
    /// Manifest encryption.
    pub cipher: CipherConfig,
}

impl AutomationConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thresholds.series_views == 0 {
            return Err(ConfigError::Validation(
                "thresholds.series_views must be at least 1".into(),
            ));
        }
        if self.thresholds.chapter_views == 0 {
            return Err(ConfigError::Validation(
                "thresholds.chapter_views must be at least 1".into(),
            ));
        }
        if self.locking.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "locking.timeout_ms must be non-zero".into(),
            ));
        }
        if self.cipher.secret_env.trim().is_empty() {
            return Err(ConfigError::Validation(
                "cipher.secret_env must name an environment variable".into(),
            ));
        }
        Ok(())
    }
}

/// File locations, relative to the workspace root unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory holding the numbered chapter folders.
    pub content_root: PathBuf,
    pub series_config: PathBuf,
    pub catalog: PathBuf,
    pub pending_views: PathBuf,
    pub pending_chapter_views: PathBuf,
    pub chapter_feed: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("."),
            series_config: PathBuf::from("manga-config.json"),
            catalog: PathBuf::from("manga.json"),
            pending_views: PathBuf::from("pending-views.json"),
            pending_chapter_views: PathBuf::from("pending-chapter-views.json"),
            chapter_feed: PathBuf::from("chapters.json"),
        }
    }
}

impl PathsConfig {
    /// Resolve every path against a workspace root.
    pub fn resolve(&self, root: &Path) -> ResolvedPaths {
        ResolvedPaths {
            content_root: root.join(&self.content_root),
            series_config: root.join(&self.series_config),
            catalog: root.join(&self.catalog),
            pending_views: root.join(&self.pending_views),
            pending_chapter_views: root.join(&self.pending_chapter_views),
            chapter_feed: root.join(&self.chapter_feed),
        }
    }
}

/// [`PathsConfig`] joined onto a concrete workspace root.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub content_root: PathBuf,
    pub series_config: PathBuf,
    pub catalog: PathBuf,
    pub pending_views: PathBuf,
    pub pending_chapter_views: PathBuf,
    pub chapter_feed: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdsConfig {
    /// Pending series views needed before they are added to `totalViews`.
    pub series_views: u64,
    /// Pending views per chapter needed before a chapter is flushed.
    pub chapter_views: u64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            series_views: 20,
            chapter_views: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockingConfig {
    /// Give up acquiring a state-file lock after this many milliseconds.
    pub timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl LockingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Ask git for chapter upload dates and changed manifests.
    pub use_git: bool,
    /// Abandon a git query after this many milliseconds.
    pub timeout_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            use_git: true,
            timeout_ms: 5_000,
        }
    }
}

impl HistoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What `generate` does with a prior catalog that exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Back the file up, warn, and regenerate as a first-time run. All views
    /// restart at zero.
    #[default]
    Reset,
    /// Refuse to run.
    Fail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub on_corrupt: CorruptPolicy,
}

/// Chapter order among feed entries that share an upload date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    pub tie_order: TieOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CipherConfig {
    /// Environment variable holding the encryption secret.
    pub secret_env: String,
    /// File name of page manifests.
    pub manifest_name: String,
    /// Value written to `encryption_version`.
    pub encryption_version: String,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            secret_env: "SECRET_TOKEN".to_string(),
            manifest_name: "manifest.json".to_string(),
            encryption_version: "1.0".to_string(),
        }
    }
}

// =============================================================================
// Loading and merging
// =============================================================================

/// Returns the stock default settings as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(AutomationConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load automation settings from `path`.
///
/// A missing file yields the stock defaults. A present file is merged over
/// the defaults, checked for unknown keys, and validated.
pub fn load_automation_config(path: &Path) -> Result<AutomationConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = if path.exists() {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let overlay: toml::Value = toml::from_str(&content)?;
        merge_toml(base, overlay)
    } else {
        base
    };
    let config: AutomationConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `automation.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# manga-sync automation settings
# ==============================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# File locations (relative to --root unless absolute)
# ---------------------------------------------------------------------------
[paths]
# Directory containing the numbered chapter folders (1/, 2/, 2.1/, ...).
content_root = "."
series_config = "manga-config.json"
catalog = "manga.json"
pending_views = "pending-views.json"
pending_chapter_views = "pending-chapter-views.json"
chapter_feed = "chapters.json"

# ---------------------------------------------------------------------------
# Flush thresholds
# ---------------------------------------------------------------------------
[thresholds]
# Pending series views required before they are added to totalViews.
series_views = 20
# Pending views per chapter required before that chapter is flushed.
chapter_views = 10

# ---------------------------------------------------------------------------
# Locking
# ---------------------------------------------------------------------------
[locking]
# Give up waiting for another run's lock after this many milliseconds.
timeout_ms = 10000

# ---------------------------------------------------------------------------
# Version control
# ---------------------------------------------------------------------------
[history]
# Use git for chapter upload dates and for finding changed manifests.
use_git = true
timeout_ms = 5000

# ---------------------------------------------------------------------------
# Catalog regeneration
# ---------------------------------------------------------------------------
[catalog]
# What to do when manga.json exists but cannot be parsed:
#   "reset" - back it up, warn, regenerate with all views at zero
#   "fail"  - stop without writing anything
on_corrupt = "reset"

# ---------------------------------------------------------------------------
# Public chapter feed
# ---------------------------------------------------------------------------
[feed]
# Order of chapters that share an upload date: "ascending" or "descending".
tie_order = "ascending"

# ---------------------------------------------------------------------------
# Manifest encryption
# ---------------------------------------------------------------------------
[cipher]
# Environment variable holding the secret. There is no fallback value.
secret_env = "SECRET_TOKEN"
manifest_name = "manifest.json"
encryption_version = "1.0"
"##
}
