//! Blob Stores
//!
//! `FsBlobStore` serves legacy files from a local directory;
//! `SignedUrlBlobStore` hands out expiring HMAC-signed URLs on a remote
//! storage host.

use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::domain::ports::{BlobStore, StorageError};

/// Keys are relative paths of plain segments
///
/// Any printable character is allowed inside a segment; only traversal,
/// empty segments and control characters are refused.
fn validate_key(key: &str) -> Result<&str, StorageError> {
    let valid_chars = key.chars().all(|c| !c.is_control() && c != '\\');
    let valid_segments = key
        .split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if key.is_empty() || !valid_chars || !valid_segments {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(key)
}

// ============================================================================
// Local filesystem
// ============================================================================

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let key = validate_key(key)?;
        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn is_local(&self) -> bool {
        true
    }

    async fn signed_url(&self, _key: &str, _ttl: Duration) -> Result<String, StorageError> {
        Err(StorageError::Unsupported("local storage serves files directly"))
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Remote storage with signed URLs
// ============================================================================

#[derive(Clone)]
pub struct SignedUrlBlobStore {
    client: reqwest::Client,
    base_url: String,
    secret: Vec<u8>,
}

impl SignedUrlBlobStore {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
        }
    }

    /// `base/key?expires=<unix>&signature=<hex hmac of "key\nexpires">`
    ///
    /// The signature covers the raw key; the URL carries it percent-encoded.
    fn sign(&self, key: &str, expires: u64) -> Result<String, StorageError> {
        let key = validate_key(key)?;
        let tag = platform::crypto::hmac_sha256(&self.secret, format!("{key}\n{expires}").as_bytes());

        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| StorageError::Remote(format!("invalid storage base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Remote("storage base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(key.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &platform::crypto::to_hex(&tag));
        Ok(url.into())
    }

    fn expiry(ttl: Duration) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(ttl)
            .as_secs()
    }
}

impl BlobStore for SignedUrlBlobStore {
    fn is_local(&self) -> bool {
        false
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.sign(key, Self::expiry(ttl))
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let url = self.sign(key, Self::expiry(Duration::from_secs(60)))?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Remote(format!(
                "storage returned {}",
                resp.status().as_u16()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let url = self.sign(key, Self::expiry(Duration::from_secs(60)))?;
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StorageError::Remote(format!("storage returned {}", status.as_u16())))
        }
    }
}

/// Blob store selected at startup
#[derive(Clone)]
pub enum AnyBlobStore {
    Fs(FsBlobStore),
    Remote(SignedUrlBlobStore),
}

impl BlobStore for AnyBlobStore {
    fn is_local(&self) -> bool {
        match self {
            AnyBlobStore::Fs(s) => s.is_local(),
            AnyBlobStore::Remote(s) => s.is_local(),
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        match self {
            AnyBlobStore::Fs(s) => s.signed_url(key, ttl).await,
            AnyBlobStore::Remote(s) => s.signed_url(key, ttl).await,
        }
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self {
            AnyBlobStore::Fs(s) => s.get_file(key).await,
            AnyBlobStore::Remote(s) => s.get_file(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self {
            AnyBlobStore::Fs(s) => s.delete(key).await,
            AnyBlobStore::Remote(s) => s.delete(key).await,
        }
    }
}
