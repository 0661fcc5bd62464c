//! Worker loop draining a [`QueueManager`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::{Job, JobStatus, QueueManager};

/// Run until the queue is empty or stopped.
///
/// The exit decision is taken under the same lock `enqueue` uses, so a job
/// pushed concurrently either gets seen here or triggers a fresh worker.
pub(super) async fn run(queue: Arc<QueueManager>, worker_id: u64) {
    debug!(queue = %queue.config.name, worker_id, "Worker started");

    loop {
        let job = {
            let mut state = queue.state.lock();
            if state.stopped || state.jobs.is_empty() {
                state.active_workers = state.active_workers.saturating_sub(1);
                None
            } else {
                state.jobs.pop_front()
            }
        };

        let Some(job) = job else {
            debug!(queue = %queue.config.name, worker_id, "Worker idle, exiting");
            queue.notify_if_idle();
            return;
        };

        process(&queue, worker_id, job).await;
        tokio::time::sleep(queue.config.pace()).await;
    }
}

async fn process(queue: &QueueManager, worker_id: u64, job: Job) {
    let permit = match queue.permits.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            error!(queue = %queue.config.name, job_id = %job.id, error = %e, "Permit pool closed");
            queue.failed.fetch_add(1, Ordering::Relaxed);
            finish(queue, job, None).await;
            return;
        }
    };

    let started = Instant::now();
    let wait_ms = (chrono::Utc::now() - job.enqueued_at).num_milliseconds();
    debug!(
        queue = %queue.config.name,
        worker_id,
        job_id = %job.id,
        subject = %job.subject_id,
        wait_ms,
        status = ?JobStatus::Running,
        "Processing job"
    );

    queue.running.fetch_add(1, Ordering::Relaxed);
    let produced = AssertUnwindSafe(
        queue
            .producer
            .produce(&job.subject_id, &job.output_target),
    )
    .catch_unwind()
    .await;
    queue.running.fetch_sub(1, Ordering::Relaxed);

    let artifact = match produced {
        Ok(artifact) => artifact,
        Err(panic) => {
            error!(
                queue = %queue.config.name,
                job_id = %job.id,
                producer = queue.producer.name(),
                panic = %panic_message(panic.as_ref()),
                "Producer panicked"
            );
            None
        }
    };

    let status = JobStatus::for_result(artifact.as_ref());
    match status {
        JobStatus::Completed => queue.completed.fetch_add(1, Ordering::Relaxed),
        _ => queue.failed.fetch_add(1, Ordering::Relaxed),
    };
    info!(
        queue = %queue.config.name,
        job_id = %job.id,
        subject = %job.subject_id,
        status = ?status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Job finished"
    );

    finish(queue, job, artifact).await;
    drop(permit);
}

/// Fire the job callback, containing any panic it raises.
async fn finish(queue: &QueueManager, job: Job, artifact: Option<crate::domain::Artifact>) {
    let job_id = job.id.clone();
    if let Err(panic) = AssertUnwindSafe(job.complete(artifact)).catch_unwind().await {
        warn!(
            queue = %queue.config.name,
            job_id = %job_id,
            panic = %panic_message(panic.as_ref()),
            "Job callback panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "<non-string panic payload>".to_string()
}
