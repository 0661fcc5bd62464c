//! Fetch strategy trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::FetchError;

/// One way of producing an artifact for a subject.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Produce a validated artifact for `subject_id` at `output`.
    ///
    /// On success the returned path holds content that passed container
    /// validation. Implementations remove partial output on failure.
    async fn fetch(&self, subject_id: &str, output: &Path) -> Result<PathBuf, FetchError>;
}
