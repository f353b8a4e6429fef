//! JSON state files on disk.
//!
//! Every state file (`manga.json`, the pending counters, manifests) is shared
//! by independent invocations and by whatever increments views on the live
//! site. Three primitives keep read-modify-write cycles safe:
//!
//! - [`lock`]: an exclusive advisory lock on `<file>.lock`, held for the whole
//!   cycle and released on drop. Contention is retried with backoff until the
//!   configured timeout.
//! - [`write_json_atomic`]: the new content goes to a temp file in the same
//!   directory, is fsynced, then renamed over the target. Readers see either
//!   the old file or the new one.
//! - [`load_json`]: distinguishes a missing file from a corrupt one so callers
//!   can apply their own policy.
//!
//! When two files are locked together the catalog is always locked first.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("required file not found: {0}")]
    Missing(PathBuf),
    #[error("timed out after {}ms waiting for lock on {path}", waited.as_millis())]
    LockTimeout { path: PathBuf, waited: Duration },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of reading a state file that may legitimately be absent.
#[derive(Debug)]
pub enum Loaded<T> {
    Missing,
    Corrupt(serde_json::Error),
    Present(T),
}

impl<T> Loaded<T> {
    pub fn present(self) -> Option<T> {
        match self {
            Loaded::Present(value) => Some(value),
            _ => None,
        }
    }
}

/// Read and parse `path`. Missing and unparseable files are reported as
/// [`Loaded`] variants; other IO failures are errors.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Loaded<T>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    Ok(match serde_json::from_str(&content) {
        Ok(value) => Loaded::Present(value),
        Err(e) => Loaded::Corrupt(e),
    })
}

/// Read and parse a file that must exist and be valid.
pub fn read_required<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    match load_json(path)? {
        Loaded::Present(value) => Ok(value),
        Loaded::Missing => Err(StoreError::Missing(path.to_path_buf())),
        Loaded::Corrupt(source) => Err(StoreError::Json {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Serialize `value` as two-space pretty JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    json.push('\n');

    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(path, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    debug!(path = %path.display(), bytes = json.len(), "wrote");
    Ok(())
}

/// Copy a corrupt file aside as `<name>.corrupt-<timestamp>` and return the
/// backup path. The original is left in place to be overwritten.
pub fn backup_corrupt(path: &Path, now: DateTime<Utc>) -> Result<PathBuf, StoreError> {
    let backup = sibling(path, &format!("corrupt-{}", now.format("%Y%m%dT%H%M%SZ")));
    fs::copy(path, &backup).map_err(|e| StoreError::io(&backup, e))?;
    Ok(backup)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// `dir/name.ext` → `dir/name.ext.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{suffix}"))
}

// =============================================================================
// Locking
// =============================================================================

const BACKOFF_START: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(200);

/// An exclusive advisory lock, released when dropped.
///
/// The lock file itself is left on disk; removing it while another process
/// waits on it would let two holders in.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "unlock failed");
        }
    }
}

/// Lock `target` by taking an exclusive lock on `target.lock`.
pub fn lock(target: &Path, timeout: Duration) -> Result<FileLock, StoreError> {
    let path = sibling(target, "lock");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;

    let start = Instant::now();
    let mut delay = BACKOFF_START;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "lock acquired");
                return Ok(FileLock { file, path });
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(StoreError::LockTimeout { path, waited });
                }
                std::thread::sleep(delay.min(timeout - waited));
                delay = (delay * 2).min(BACKOFF_MAX);
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        }
    }
}
