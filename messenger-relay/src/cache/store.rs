//! Filesystem-backed artifact cache.
//!
//! Entries are plain files named after the sanitized subject id. An entry is
//! served only if it passes size and container-signature validation at read
//! time; nothing is ever evicted in process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::media::{MediaKind, validate_file};
use crate::utils::fs::{self, remove_file_quiet};
use crate::utils::text::sanitize_key;
use crate::{Error, Result};

/// Configuration for a cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cached artifacts.
    pub dir: PathBuf,
    /// Files of this size or smaller are treated as corrupt.
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
}

fn default_min_bytes() -> u64 {
    1024
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            min_bytes: default_min_bytes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("messenger-relay-cache"))
    }
}

/// Counters exposed for the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub rejected: u64,
    pub stored: u64,
}

/// Content cache keyed by subject id, holding artifacts of a single media kind.
pub struct CacheStore {
    config: CacheConfig,
    kind: MediaKind,
    hits: AtomicU64,
    misses: AtomicU64,
    rejected: AtomicU64,
    stored: AtomicU64,
}

impl CacheStore {
    pub fn new(config: CacheConfig, kind: MediaKind) -> Self {
        Self {
            config,
            kind,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            stored: AtomicU64::new(0),
        }
    }

    /// Path an entry for `subject_id` would live at, if the id is cacheable.
    pub fn entry_path(&self, subject_id: &str) -> Option<PathBuf> {
        let key = sanitize_key(subject_id);
        if key.is_empty() {
            return None;
        }
        Some(
            self.config
                .dir
                .join(format!("{}.{}", key, self.kind.extension())),
        )
    }

    /// Return the cached artifact for `subject_id` if it exists and is valid.
    ///
    /// Invalid entries are removed so the next fetch can repopulate them.
    pub async fn lookup(&self, subject_id: &str) -> Option<PathBuf> {
        let Some(path) = self.entry_path(subject_id) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let check = validate_file(&path, self.kind, self.config.min_bytes).await;
        if check.is_valid() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(subject = %subject_id, path = %path.display(), "Cache hit");
            return Some(path);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if !matches!(check, crate::media::ArtifactCheck::Missing) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(subject = %subject_id, reason = %check, "Discarding invalid cache entry");
            remove_file_quiet(&path).await;
        }
        None
    }

    /// Copy a verified artifact into the cache. Failures are logged, never returned.
    pub async fn store(&self, subject_id: &str, artifact: &Path) -> bool {
        match self.try_store(subject_id, artifact).await {
            Ok(path) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
                debug!(subject = %subject_id, path = %path.display(), "Cached artifact");
                true
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Failed to cache artifact");
                false
            }
        }
    }

    async fn try_store(&self, subject_id: &str, artifact: &Path) -> Result<PathBuf> {
        let path = self
            .entry_path(subject_id)
            .ok_or_else(|| Error::validation(format!("subject '{subject_id}' is not cacheable")))?;

        let check = validate_file(artifact, self.kind, self.config.min_bytes).await;
        if !check.is_valid() {
            return Err(Error::validation(format!("refusing to cache: {check}")));
        }

        fs::ensure_dir_all_with_op("creating cache directory", &self.config.dir).await?;

        // Copy under a unique temporary name, then rename into place so a
        // concurrent lookup never observes a partially written entry.
        let staging = self
            .config
            .dir
            .join(format!(".{}.partial", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::copy(artifact, &staging).await {
            remove_file_quiet(&staging).await;
            return Err(fs::io_error("copying into cache", &staging, e));
        }
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            remove_file_quiet(&staging).await;
            return Err(fs::io_error("finalizing cache entry", &path, e));
        }
        Ok(path)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
        }
    }
}
