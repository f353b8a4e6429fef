//! # manga-sync
//!
//! Metadata automation for manga sites hosted as static files in a git
//! repository. The repository is the data source: numbered directories are
//! chapters, images inside them are pages, and a handful of JSON files hold
//! the state the site reads.
//!
//! ```text
//! site/
//! ├── manga-config.json            # Series metadata + lockedChapters (hand-edited)
//! ├── automation.toml              # Optional operational settings
//! ├── manga.json                   # Catalog (generated, merged, flushed into)
//! ├── chapters.json                # Public feed, newest first (derived)
//! ├── pending-views.json           # Series views not yet in the catalog
//! ├── pending-chapter-views.json   # Per-chapter views not yet in the catalog
//! ├── 1/
//! │   ├── manifest.json            # Page URLs, encrypted before publishing
//! │   └── 001.jpg ...
//! └── 2.1/
//! ```
//!
//! # Operations
//!
//! Every operation is a short-lived, independent invocation, typically a CI
//! step:
//!
//! | Command | Reads | Writes |
//! |---------|-------|--------|
//! | `generate` | folders, series config, catalog | catalog, feed |
//! | `sync` | catalog, pending files | pending files (only if entries are missing) |
//! | `flush-series` | catalog, `pending-views.json` | both, once the threshold is met |
//! | `flush-chapters` | catalog, `pending-chapter-views.json` | both, per chapter at threshold |
//! | `encrypt` | manifests | manifests not yet encrypted |
//!
//! # View Counting
//!
//! The live site never writes the catalog. It bumps the pending counters, and
//! the flush commands move those into the catalog in batches once a threshold
//! is reached, keeping commit noise down. Regenerating the catalog must never
//! lose what has been flushed: views, upload dates and titles are carried
//! forward from the previous catalog ([`merge`]).
//!
//! Flushes touch two files and use the pending file as a write-ahead log so an
//! interrupted run is finished exactly once by the next one ([`flush`]).
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Finds chapter folders, counts pages, derives upload dates |
//! | [`history`] | Best-effort git queries behind the `VersionHistory` trait |
//! | [`merge`] | Builds the catalog from scan results, config and the prior catalog |
//! | [`pending`] | Keeps pending counters in step with the catalog |
//! | [`flush`] | Threshold flushes with crash recovery |
//! | [`cipher`] | Manifest page encryption and manifest discovery |
//! | [`feed`] | Projects the catalog into the public chapter feed |
//! | [`reset`] | Zeroes every counter |
//! | [`commands`] | Per-command orchestration: locks, load, call, persist |
//! | [`store`] | File locks, atomic JSON writes, tolerant loading |
//! | [`config`] | Series config (JSON) and automation settings (TOML) |
//! | [`types`] | Persisted JSON shapes |
//! | [`naming`] | Chapter-key grammar and numeric ordering |
//! | [`output`] | CLI report formatting |
//! | [`logging`] | `tracing` subscriber setup |

pub mod cipher;
pub mod commands;
pub mod config;
pub mod feed;
pub mod flush;
pub mod history;
pub mod logging;
pub mod merge;
pub mod naming;
pub mod output;
pub mod pending;
pub mod reset;
pub mod scan;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
