//! Page URL encryption for chapter manifests.
//!
//! Each chapter folder may carry a `manifest.json` listing its page URLs.
//! Before publishing, every URL is replaced by an opaque token so that page
//! addresses cannot be scraped from the repository:
//!
//! ```text
//! token = hex(iv) ":" hex(AES-256-CBC(key, iv, PKCS#7(url)))
//! key   = SHA-256(secret)
//! ```
//!
//! A fresh random IV is drawn for every page, so encrypting the same URL twice
//! gives different tokens. The reader decrypts in the browser with the same
//! secret.
//!
//! Encryption is idempotent per manifest: if the first page already looks like
//! a token the manifest is left byte-for-byte untouched.

use crate::history::VersionHistory;
use crate::store::{self, Loaded, StoreError};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("encryption secret not set: export {0}")]
    MissingSecret(String),
    #[error("not a page token: {0}")]
    InvalidToken(String),
    #[error("{path} is not a valid manifest: {source}")]
    InvalidManifest {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("manifest not found: {0}")]
    MissingManifest(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 256-bit key derived from the shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn derive(secret: &str) -> Self {
        Self(Sha256::digest(secret.as_bytes()).into())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Read the secret from the environment variable `var`.
pub fn load_key(var: &str) -> Result<SecretKey, CipherError> {
    key_from_secret(var, std::env::var(var).ok())
}

fn key_from_secret(var: &str, secret: Option<String>) -> Result<SecretKey, CipherError> {
    match secret {
        Some(s) if !s.is_empty() => Ok(SecretKey::derive(&s)),
        _ => Err(CipherError::MissingSecret(var.to_string())),
    }
}

/// Encrypt one page URL into a `hex(iv):hex(ciphertext)` token.
pub fn encrypt_page(page: &str, key: &SecretKey) -> String {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(&key.0.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(page.as_bytes());
    format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
}

/// Inverse of [`encrypt_page`].
pub fn decrypt_page(token: &str, key: &SecretKey) -> Result<String, CipherError> {
    let invalid = || CipherError::InvalidToken(token.to_string());
    if !is_encrypted(token) {
        return Err(invalid());
    }
    let (iv_hex, ct_hex) = token.split_once(':').ok_or_else(invalid)?;
    let iv: [u8; IV_LEN] = hex::decode(iv_hex)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(invalid)?;
    let ciphertext = hex::decode(ct_hex).map_err(|_| invalid())?;
    let plain = Aes256CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| invalid())?;
    String::from_utf8(plain).map_err(|_| invalid())
}

/// Whether `s` has the token shape `^[0-9a-fA-F]{32}:[0-9a-fA-F]+$`.
pub fn is_encrypted(s: &str) -> bool {
    let Some((iv, ct)) = s.split_once(':') else {
        return false;
    };
    let hex = |part: &str| part.bytes().all(|b| b.is_ascii_hexdigit());
    iv.len() == IV_LEN * 2 && hex(iv) && !ct.is_empty() && hex(ct)
}

// =============================================================================
// Manifests
// =============================================================================

/// `manifest.json` inside a chapter folder. Unknown fields are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub pages: Option<Vec<String>>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    Encrypted { pages: usize },
    AlreadyEncrypted,
    NoPages,
}

/// Encrypt every page of the manifest at `path` and persist it.
///
/// The file is locked for the read-modify-write and replaced atomically. An
/// already-encrypted manifest or one without `pages` is not rewritten.
pub fn encrypt_manifest(
    path: &Path,
    key: &SecretKey,
    encryption_version: &str,
    lock_timeout: Duration,
) -> Result<ManifestOutcome, CipherError> {
    let _lock = store::lock(path, lock_timeout)?;
    let mut manifest: Manifest = match store::load_json(path)? {
        Loaded::Present(m) => m,
        Loaded::Missing => return Err(CipherError::MissingManifest(path.to_path_buf())),
        Loaded::Corrupt(source) => {
            return Err(CipherError::InvalidManifest {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let Some(pages) = manifest.pages.as_mut() else {
        warn!(path = %path.display(), "manifest has no pages array, skipping");
        return Ok(ManifestOutcome::NoPages);
    };
    if pages.first().is_some_and(|p| is_encrypted(p)) {
        debug!(path = %path.display(), "already encrypted");
        return Ok(ManifestOutcome::AlreadyEncrypted);
    }

    for page in pages.iter_mut() {
        *page = encrypt_page(page, key);
    }
    let count = pages.len();
    manifest.encrypted = true;
    manifest.encryption_version = Some(encryption_version.to_string());
    store::write_json_atomic(path, &manifest)?;
    Ok(ManifestOutcome::Encrypted { pages: count })
}

// =============================================================================
// Discovery
// =============================================================================

/// How the manifest list was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    Explicit,
    Walk,
    LastCommit,
    /// Git could not answer; every manifest was checked instead.
    WalkFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    pub source: DiscoverySource,
    pub manifests: Vec<PathBuf>,
}

/// Which manifests to look at.
#[derive(Debug, Clone, Copy)]
pub enum Selection<'a> {
    Paths(&'a [PathBuf]),
    All,
    Changed,
}

/// Find manifests to encrypt.
///
/// `workspace` is the directory explicit and git paths are relative to;
/// `content_root` is walked for `manifest_name` files when every manifest is
/// wanted.
pub fn discover(
    selection: Selection<'_>,
    workspace: &Path,
    content_root: &Path,
    manifest_name: &str,
    history: &dyn VersionHistory,
) -> Discovery {
    match selection {
        Selection::Paths(paths) => Discovery {
            source: DiscoverySource::Explicit,
            manifests: paths.iter().map(|p| workspace.join(p)).collect(),
        },
        Selection::All => Discovery {
            source: DiscoverySource::Walk,
            manifests: walk_manifests(content_root, manifest_name),
        },
        Selection::Changed => match history.changed_in_last_commit() {
            Some(changed) => Discovery {
                source: DiscoverySource::LastCommit,
                manifests: changed
                    .into_iter()
                    .filter(|p| is_manifest_path(p, manifest_name))
                    .map(|p| workspace.join(p))
                    .filter(|p| p.is_file())
                    .collect(),
            },
            None => {
                warn!("could not read last commit, checking every manifest");
                Discovery {
                    source: DiscoverySource::WalkFallback,
                    manifests: walk_manifests(content_root, manifest_name),
                }
            }
        },
    }
}

fn is_manifest_path(path: &Path, manifest_name: &str) -> bool {
    let hidden = path
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'));
    !hidden && path.file_name().is_some_and(|n| n == manifest_name)
}

/// Every `manifest_name` file under `root`, skipping hidden directories.
fn walk_manifests(root: &Path, manifest_name: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == manifest_name)
        .map(|e| e.into_path())
        .collect()
}
