//! Version-control lookups.
//!
//! Two read-only questions are asked of the repository hosting the site:
//!
//! - when was a path first committed (used as a chapter's upload date)
//! - which files changed in the most recent commit (used to find manifests
//!   that still need encrypting)
//!
//! Both are best-effort. Any failure (git missing, not a repository, shallow
//! clone, timeout) yields `None` and callers fall back to filesystem data.
//!
//! The [`VersionHistory`] trait is the seam. [`GitHistory`] shells out to
//! `git`; [`NoHistory`] always answers `None` and is used when git lookups
//! are disabled in the settings.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use tracing::debug;

pub trait VersionHistory {
    /// Timestamp of the earliest commit touching `path`.
    fn first_change(&self, path: &Path) -> Option<DateTime<Utc>>;

    /// Paths changed by the last commit, relative to the queried directory.
    fn changed_in_last_commit(&self) -> Option<Vec<PathBuf>>;
}

/// Answers nothing. Forces filesystem fallbacks everywhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl VersionHistory for NoHistory {
    fn first_change(&self, _path: &Path) -> Option<DateTime<Utc>> {
        None
    }

    fn changed_in_last_commit(&self) -> Option<Vec<PathBuf>> {
        None
    }
}

/// Queries the git repository containing `repo_dir`.
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo_dir: PathBuf,
    timeout: Duration,
}

impl GitHistory {
    pub fn new(repo_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout,
        }
    }

    /// Run `git <args>` in the repository and return stdout on success.
    ///
    /// The child runs on a helper thread so a wedged git (credential prompt,
    /// locked index on a network share) cannot stall the invocation past
    /// `timeout`. A timed-out helper is abandoned; the process is short-lived.
    fn run(&self, args: &[&str]) -> Option<String> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null());

        let (tx, rx) = mpsc::channel::<std::io::Result<Output>>();
        std::thread::spawn(move || {
            let _ = tx.send(command.output());
        });

        let output = match rx.recv_timeout(self.timeout) {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(error = %e, "git unavailable");
                return None;
            }
            Err(_) => {
                debug!(?args, timeout_ms = self.timeout.as_millis() as u64, "git timed out");
                return None;
            }
        };
        if !output.status.success() {
            debug!(?args, status = %output.status, "git query failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionHistory for GitHistory {
    fn first_change(&self, path: &Path) -> Option<DateTime<Utc>> {
        let path = path.to_string_lossy();
        let stdout = self.run(&["log", "--reverse", "--format=%cI", "--", &path])?;
        parse_first_timestamp(&stdout)
    }

    fn changed_in_last_commit(&self) -> Option<Vec<PathBuf>> {
        let stdout = self.run(&["diff", "--name-only", "--relative", "HEAD~1", "HEAD"])?;
        Some(parse_path_list(&stdout))
    }
}

/// First non-empty line of `git log --format=%cI` output, as UTC.
fn parse_first_timestamp(stdout: &str) -> Option<DateTime<Utc>> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| DateTime::parse_from_rfc3339(l).ok())
        .map(|dt| dt.to_utc())
}

fn parse_path_list(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect()
}
