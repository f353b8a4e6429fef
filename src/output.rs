//! CLI output formatting for every command.
//!
//! Each run must leave an audit trail in the CI log: what was read, what was
//! decided, and what was written. Reports go to stdout; warnings go through
//! `tracing` to stderr.
//!
//! # Output Format
//!
//! ## Generate
//!
//! ```text
//! Catalog (first-time generation, all views start at 0)
//! 001 Chapter 1 (12 pages)
//!     Views: 0
//!     Uploaded: 2024-05-20
//! 002 Chapter 3 (locked)
//!     Uploaded: 2024-05-20
//! Wrote manga.json: 2 chapters (1 published, 1 locked), 0 total views
//! Wrote chapters.json: 2 entries
//! ```
//!
//! ## Flush
//!
//! ```text
//! Chapter views (threshold 10)
//!     chapter 1: +12 views, total 112
//!     chapter 2: waiting (4/10)
//! Catalog updated
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::cipher::{DiscoverySource, ManifestOutcome};
use crate::commands::{EncryptReport, FeedReport, GenerateReport, SyncReport};
use crate::flush::FlushReport;
use crate::merge::ChapterStatus;
use crate::reset::{CONFIRMATION, ResetReport};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// File name for display, falling back to the full path.
fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// generate
// ============================================================================

pub fn format_generate_output(report: &GenerateReport) -> Vec<String> {
    let merge = &report.merge;
    let mut lines = Vec::new();

    if let Some(backup) = &report.corrupt_backup {
        lines.push(format!(
            "Previous catalog was corrupt; backed up to {}",
            backup.display()
        ));
    }
    lines.push(if merge.first_time {
        "Catalog (first-time generation, all views start at 0)".to_string()
    } else {
        "Catalog (update, views carried forward)".to_string()
    });

    for (i, chapter) in merge.chapters.iter().enumerate() {
        let detail = match chapter.status {
            ChapterStatus::Locked => "locked".to_string(),
            ChapterStatus::AutoUnlocked => {
                format!("{}, unlocked", plural(chapter.page_count as usize, "page", "pages"))
            }
            ChapterStatus::Unlocked => plural(chapter.page_count as usize, "page", "pages"),
        };
        lines.push(format!("{} Chapter {} ({})", format_index(i + 1), chapter.key, detail));
        if chapter.status != ChapterStatus::Locked {
            lines.push(format!("{}Views: {}", indent(1), chapter.views));
        }
        if let Some(date) = chapter.upload_date {
            lines.push(format!("{}Uploaded: {}", indent(1), date.format("%Y-%m-%d")));
        }
    }

    if !merge.invalid_locked.is_empty() {
        lines.push(format!(
            "Ignored lockedChapters entries: {}",
            merge.invalid_locked.join(", ")
        ));
    }

    let locked = merge.count(ChapterStatus::Locked);
    lines.push(format!(
        "Wrote {}: {} ({} published, {} locked), {} total views",
        file_label(&report.catalog_path),
        plural(merge.chapters.len(), "chapter", "chapters"),
        merge.chapters.len() - locked,
        locked,
        merge.total_views,
    ));
    lines.push(format!(
        "Wrote {}: {}",
        file_label(&report.feed_path),
        plural(report.feed_entries, "entry", "entries")
    ));
    lines
}

pub fn print_generate_output(report: &GenerateReport) {
    print_lines(format_generate_output(report));
}

// ============================================================================
// sync
// ============================================================================

pub fn format_sync_output(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Pending counters ({} in catalog)",
        plural(report.catalog_chapters, "chapter", "chapters")
    )];
    for backup in &report.corrupt_backups {
        lines.push(format!("{}Corrupt file backed up to {}", indent(1), backup.display()));
    }
    for key in &report.added {
        lines.push(format!("{}+ chapter {}", indent(1), key));
    }
    if report.series_pending_created {
        lines.push(format!("{}+ series counter", indent(1)));
    }
    lines.push(if report.chapter_pending_written || report.series_pending_created {
        format!("Added {}", plural(report.added.len(), "chapter counter", "chapter counters"))
    } else {
        "Already in sync, nothing written".to_string()
    });
    lines
}

pub fn print_sync_output(report: &SyncReport) {
    print_lines(format_sync_output(report));
}

// ============================================================================
// flush
// ============================================================================

pub fn format_flush_output(title: &str, report: &FlushReport) -> Vec<String> {
    let mut lines = vec![format!("{} (threshold {})", title, report.threshold)];
    for r in &report.recovered {
        let note = if r.already_applied {
            "already in catalog"
        } else {
            "applied now"
        };
        lines.push(format!(
            "{}{}: recovered {} from an interrupted flush ({})",
            indent(1),
            r.target,
            plural(r.views as usize, "view", "views"),
            note
        ));
    }
    for f in &report.flushed {
        lines.push(format!(
            "{}{}: +{} views, total {}",
            indent(1),
            f.target,
            f.views,
            f.new_total
        ));
    }
    for w in &report.waiting {
        lines.push(format!(
            "{}{}: waiting ({}/{})",
            indent(1),
            w.target,
            w.pending,
            report.threshold
        ));
    }
    for key in &report.unknown {
        lines.push(format!("{}chapter {}: not in catalog, skipped", indent(1), key));
    }
    lines.push(if report.catalog_written {
        "Catalog updated".to_string()
    } else {
        "No changes written".to_string()
    });
    lines
}

pub fn print_flush_output(title: &str, report: &FlushReport) {
    print_lines(format_flush_output(title, report));
}

// ============================================================================
// feed
// ============================================================================

pub fn format_feed_output(report: &FeedReport) -> Vec<String> {
    vec![format!(
        "Wrote {}: {}",
        file_label(&report.path),
        plural(report.entries, "entry", "entries")
    )]
}

pub fn print_feed_output(report: &FeedReport) {
    print_lines(format_feed_output(report));
}

// ============================================================================
// encrypt
// ============================================================================

pub fn format_encrypt_output(report: &EncryptReport) -> Vec<String> {
    let source = match report.discovery.source {
        DiscoverySource::Explicit => "given on the command line",
        DiscoverySource::Walk => "all manifests",
        DiscoverySource::LastCommit => "changed in the last commit",
        DiscoverySource::WalkFallback => "all manifests, git unavailable",
    };
    let mut lines = vec![format!(
        "Manifests ({}, {})",
        plural(report.results.len(), "file", "files"),
        source
    )];
    for (path, result) in &report.results {
        let status = match result {
            Ok(ManifestOutcome::Encrypted { pages }) => {
                format!("encrypted {}", plural(*pages, "page", "pages"))
            }
            Ok(ManifestOutcome::AlreadyEncrypted) => "already encrypted".to_string(),
            Ok(ManifestOutcome::NoPages) => "no pages array, skipped".to_string(),
            Err(e) => format!("failed: {e}"),
        };
        lines.push(format!("{}{}: {}", indent(1), path.display(), status));
    }
    let mut summary = format!("Encrypted {}/{}", report.encrypted(), report.results.len());
    if report.failed() > 0 {
        summary.push_str(&format!(", {} failed", report.failed()));
    }
    lines.push(summary);
    lines
}

pub fn print_encrypt_output(report: &EncryptReport) {
    print_lines(format_encrypt_output(report));
}

// ============================================================================
// reset
// ============================================================================

/// What a reset is about to destroy, shown before asking for confirmation.
pub fn format_reset_warning() -> Vec<String> {
    vec![
        "This will set to 0:".to_string(),
        format!("{}series total views", indent(1)),
        format!("{}every chapter's views", indent(1)),
        format!("{}pending series views", indent(1)),
        format!("{}every pending chapter counter", indent(1)),
        format!("Type {CONFIRMATION} to continue:"),
    ]
}

pub fn format_reset_output(report: &ResetReport) -> Vec<String> {
    let mut lines = vec!["Reset".to_string()];
    if let Some((series, chapters)) = report.catalog {
        lines.push(format!(
            "{}catalog: cleared {} series views, {} chapter views",
            indent(1),
            series,
            chapters
        ));
    }
    lines.push(format!(
        "{}pending series: cleared {} views",
        indent(1),
        report.series_pending
    ));
    if let Some(cleared) = report.chapter_pending {
        lines.push(format!("{}pending chapters: cleared {} views", indent(1), cleared));
    }
    for path in &report.skipped {
        lines.push(format!("{}{}: not found, skipped", indent(1), path.display()));
    }
    lines.push("All views reset to 0".to_string());
    lines
}

pub fn print_reset_output(report: &ResetReport) {
    print_lines(format_reset_output(report));
}

// ============================================================================
// Tests
// ============================================================================
