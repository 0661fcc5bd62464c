//! Queued jobs and their completion callbacks.

use std::future::Future;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::domain::{Artifact, OutputTarget};

/// One-shot completion callback.
pub type JobCallback = Box<dyn FnOnce(Option<Artifact>) -> BoxFuture<'static, ()> + Send>;

/// Lifecycle of a job, as seen in queue statistics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal status for a finished job.
    pub fn for_result(artifact: Option<&Artifact>) -> Self {
        if artifact.is_some() {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

/// A fetch or generation request.
///
/// The callback is consumed by [`Job::complete`], so it can fire at most once;
/// the queue guarantees it fires at least once.
pub struct Job {
    pub id: String,
    pub subject_id: String,
    pub output_target: OutputTarget,
    pub enqueued_at: DateTime<Utc>,
    on_complete: JobCallback,
}

impl Job {
    pub fn new<F, Fut>(
        subject_id: impl Into<String>,
        output_target: OutputTarget,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce(Option<Artifact>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            output_target,
            enqueued_at: Utc::now(),
            on_complete: Box::new(move |artifact| on_complete(artifact).boxed()),
        }
    }

    /// Job whose result is delivered over a channel instead of a closure.
    pub fn with_sender(
        subject_id: impl Into<String>,
        output_target: OutputTarget,
    ) -> (Self, oneshot::Receiver<Option<Artifact>>) {
        let (tx, rx) = oneshot::channel();
        let job = Self::new(subject_id, output_target, move |artifact| async move {
            let _ = tx.send(artifact);
        });
        (job, rx)
    }

    /// Consume the job and return the callback future for `artifact`.
    pub(crate) fn complete(self, artifact: Option<Artifact>) -> BoxFuture<'static, ()> {
        (self.on_complete)(artifact)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("subject_id", &self.subject_id)
            .field("output_target", &self.output_target)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}
