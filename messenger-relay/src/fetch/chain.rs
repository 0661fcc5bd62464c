//! Cache-first fallback chain over fetch strategies.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::FetchStrategy;
use crate::cache::CacheStore;
use crate::domain::{Artifact, OutputTarget};
use crate::media::MediaKind;
use crate::queue::ArtifactProducer;

/// Tries the cache, then each strategy in order, until one produces a valid
/// artifact.
pub struct FetchChain {
    cache: Option<Arc<CacheStore>>,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    kind: MediaKind,
}

impl FetchChain {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            cache: None,
            strategies: Vec::new(),
            kind,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Append a strategy. Strategies run in the order they were added.
    pub fn with_strategy(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Fetch `subject_id` into `output`. Never errors; `None` means every
    /// source failed.
    pub async fn fetch(&self, subject_id: &str, output: &Path) -> Option<PathBuf> {
        if let Some(path) = self.from_cache(subject_id, output).await {
            return Some(path);
        }

        for strategy in &self.strategies {
            match strategy.fetch(subject_id, output).await {
                Ok(path) => {
                    info!(subject = %subject_id, strategy = strategy.name(), "Fetch succeeded");
                    if let Some(cache) = &self.cache {
                        cache.store(subject_id, &path).await;
                    }
                    return Some(path);
                }
                Err(e) => {
                    warn!(
                        subject = %subject_id,
                        strategy = strategy.name(),
                        kind = e.kind(),
                        error = %e,
                        "Fetch strategy failed"
                    );
                }
            }
        }

        warn!(subject = %subject_id, tried = ?self.strategy_names(), "All fetch strategies failed");
        None
    }

    async fn from_cache(&self, subject_id: &str, output: &Path) -> Option<PathBuf> {
        let cache = self.cache.as_ref()?;
        let cached = cache.lookup(subject_id).await?;

        if cached == output {
            return Some(cached);
        }
        if let Some(parent) = output.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(path = %parent.display(), error = %e, "Cannot prepare output directory");
            return None;
        }
        match tokio::fs::copy(&cached, output).await {
            Ok(_) => {
                debug!(subject = %subject_id, "Served from cache");
                Some(output.to_path_buf())
            }
            Err(e) => {
                warn!(subject = %subject_id, error = %e, "Failed to copy cached artifact");
                None
            }
        }
    }
}

#[async_trait]
impl ArtifactProducer for FetchChain {
    fn name(&self) -> &'static str {
        "fetch-chain"
    }

    async fn produce(&self, subject_id: &str, target: &OutputTarget) -> Option<Artifact> {
        let output = target.resolve(subject_id, self.kind);
        self.fetch(subject_id, &output).await.map(Artifact::Local)
    }
}
