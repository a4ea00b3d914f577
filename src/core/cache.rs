//! Write-once cache for rendered invoice documents.
//!
//! One file per key under the documents directory. A key is fetched at most
//! once: concurrent callers for the same key queue on a per-key gate and the
//! later ones find the file the first one wrote. Files are written to a
//! hidden `.part` sibling and renamed into place, so the deterministic path
//! only ever holds a complete, non-empty document.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::config::paths::{self, invoice_file_name};
use crate::domain::CachedArtifact;

/// Errors that can occur while resolving an artifact
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Downloaded document for {key} is empty")]
    EmptyArtifact { key: String },

    #[error("Failed to download document for {key}: {reason}")]
    Download { key: String, reason: String },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed artifact cache
pub struct ArtifactCache {
    /// Directory holding cached documents
    dir: PathBuf,

    /// Per-key gates serializing fetches of the same key
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Hex SHA256 prefix used to keep sanitized file names unique
fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// File-name-safe stem for `key`; keys that needed rewriting get a digest suffix
fn file_stem(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem == key && !stem.is_empty() {
        stem
    } else {
        format!("{}-{}", stem, key_digest(key))
    }
}

async fn remove_if_present(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

/// Per-key single-flight lock; the map entry goes away with its last holder
struct Gate<'a> {
    cache: &'a ArtifactCache,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for Gate<'_> {
    fn drop(&mut self) {
        let mut gates = self.cache.gates.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this holder remain
        if Arc::strong_count(&self.lock) <= 2 {
            gates.remove(self.key);
        }
    }
}

impl ArtifactCache {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Cache in the configured documents directory
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(paths::documents()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic location of the document for `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(invoice_file_name(&file_stem(key)))
    }

    fn part_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.part", name))
    }

    /// The cached artifact for `key`, if a valid one exists
    pub async fn lookup(&self, key: &str) -> Result<Option<CachedArtifact>, CacheError> {
        let path = self.path_for(key);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        if !metadata.is_file() || metadata.len() == 0 {
            // Never written by this cache; not a usable hit
            warn!(path = %path.display(), "Discarding invalid cached document");
            remove_if_present(&path).await;
            return Ok(None);
        }

        let cached_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(CachedArtifact {
            key: key.to_string(),
            local_path: path,
            size_bytes: metadata.len(),
            cached_at,
        }))
    }

    fn gate<'a>(&'a self, key: &'a str) -> Gate<'a> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(gates.entry(key.to_string()).or_default());
        Gate {
            cache: self,
            key,
            lock,
        }
    }

    /// Return the local document for `key`, fetching it with `fetch` only if
    /// it is not cached yet.
    #[instrument(skip(self, fetch))]
    pub async fn resolve<F, Fut>(&self, key: &str, fetch: F) -> Result<CachedArtifact, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        if let Some(hit) = self.lookup(key).await? {
            debug!("Cache hit");
            return Ok(hit);
        }

        let gate = self.gate(key);
        let _held = gate.lock.lock().await;

        // Another caller may have filled it while we waited
        match self.lookup(key).await? {
            Some(hit) => {
                debug!("Filled by concurrent fetch");
                Ok(hit)
            }
            None => self.fetch_and_store(key, fetch).await,
        }
    }

    async fn fetch_and_store<F, Fut>(&self, key: &str, fetch: F) -> Result<CachedArtifact, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let bytes = fetch().await.map_err(|e| CacheError::Download {
            key: key.to_string(),
            reason: format!("{:#}", e),
        })?;

        if bytes.is_empty() {
            warn!("Fetched document is empty");
            return Err(CacheError::EmptyArtifact {
                key: key.to_string(),
            });
        }

        let path = self.path_for(key);
        let part = Self::part_path(&path);

        match self.persist(key, &part, &path, &bytes).await {
            Ok(size_bytes) => {
                info!(size_bytes, path = %path.display(), "Document cached");
                Ok(CachedArtifact {
                    key: key.to_string(),
                    local_path: path,
                    size_bytes,
                    cached_at: Utc::now(),
                })
            }
            Err(e) => {
                remove_if_present(&part).await;
                remove_if_present(&path).await;
                Err(e)
            }
        }
    }

    /// Write `bytes` to `part`, verify, then move it to `path`
    async fn persist(
        &self,
        key: &str,
        part: &Path,
        path: &Path,
        bytes: &[u8],
    ) -> Result<u64, CacheError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;

        fs::write(part, bytes)
            .await
            .map_err(|e| CacheError::io(part, e))?;

        let written = fs::metadata(part)
            .await
            .map_err(|e| CacheError::io(part, e))?
            .len();

        if written == 0 || written != bytes.len() as u64 {
            return Err(CacheError::Download {
                key: key.to_string(),
                reason: format!("wrote {} of {} bytes", written, bytes.len()),
            });
        }

        fs::rename(part, path)
            .await
            .map_err(|e| CacheError::io(path, e))?;

        Ok(written)
    }
}
