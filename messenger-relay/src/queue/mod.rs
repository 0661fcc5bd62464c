//! Producer/consumer job queue.
//!
//! A [`QueueManager`] owns a FIFO of [`Job`]s and lazily spawns background
//! workers that drain it. Every producer execution holds one permit from a
//! [`PermitPool`]; pools can be shared between queues so that downloads and
//! image generation draw from the same budget.
//!
//! What a job actually does is supplied by an [`ArtifactProducer`].

mod job;
mod manager;
mod worker;

use async_trait::async_trait;

pub use job::{Job, JobCallback, JobStatus};
pub use manager::{PermitPool, QueueConfig, QueueManager, QueueStats};

use crate::domain::{Artifact, OutputTarget};

/// Work executed by queue workers for each job.
#[async_trait]
pub trait ArtifactProducer: Send + Sync {
    /// Producer name for logs.
    fn name(&self) -> &'static str;

    /// Produce an artifact for `subject_id`, or `None` on failure.
    ///
    /// Implementations log their own failures; the queue only sees the outcome.
    async fn produce(&self, subject_id: &str, target: &OutputTarget) -> Option<Artifact>;
}
