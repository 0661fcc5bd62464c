//! Queue state and the public queue handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{AcquireError, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{ArtifactProducer, Job, JobStatus, worker};

/// Configuration for a job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name used in logs and statistics.
    pub name: String,
    /// Maximum number of concurrently running workers.
    pub workers: usize,
    /// Pause after each job, in milliseconds.
    pub pace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "jobs".to_string(),
            workers: 1,
            pace_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

/// Counting permit pool bounding in-flight producer executions.
///
/// Cloning shares the underlying semaphore.
#[derive(Debug, Clone)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
}

impl PermitPool {
    /// A pool of `size` permits; zero is raised to one.
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. The permit is returned to the pool when dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }
}

/// Snapshot of queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active_workers: usize,
    /// Jobs currently inside a producer.
    pub running: usize,
    /// Number of workers spawned since creation.
    pub generation: u64,
    pub completed: u64,
    pub failed: u64,
    pub available_permits: usize,
    pub stopped: bool,
}

pub(super) struct QueueState {
    pub(super) jobs: VecDeque<Job>,
    pub(super) active_workers: usize,
    pub(super) stopped: bool,
    pub(super) generation: u64,
}

/// FIFO job queue drained by lazily started workers.
pub struct QueueManager {
    pub(super) config: QueueConfig,
    pub(super) producer: Arc<dyn ArtifactProducer>,
    pub(super) permits: PermitPool,
    pub(super) state: Mutex<QueueState>,
    pub(super) running: AtomicUsize,
    pub(super) completed: AtomicU64,
    pub(super) failed: AtomicU64,
    pub(super) idle: Notify,
}

impl QueueManager {
    pub fn new(
        config: QueueConfig,
        producer: Arc<dyn ArtifactProducer>,
        permits: PermitPool,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            producer,
            permits,
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                active_workers: 0,
                stopped: false,
                generation: 0,
            }),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            idle: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Append `job` to the tail of the queue and make sure a worker drains it.
    ///
    /// On a stopped queue the job is completed immediately with `None`.
    pub fn enqueue(self: &Arc<Self>, job: Job) {
        let spawn_worker = {
            let mut state = self.state.lock();
            if state.stopped {
                drop(state);
                warn!(queue = %self.config.name, job_id = %job.id, "Queue stopped, rejecting job");
                self.failed.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(job.complete(None));
                return;
            }

            debug!(
                queue = %self.config.name,
                job_id = %job.id,
                subject = %job.subject_id,
                status = ?JobStatus::Pending,
                pending = state.jobs.len() + 1,
                "Job enqueued"
            );
            state.jobs.push_back(job);

            if state.active_workers < self.config.workers.max(1) {
                state.active_workers += 1;
                state.generation += 1;
                Some(state.generation)
            } else {
                None
            }
        };

        if let Some(worker_id) = spawn_worker {
            debug!(queue = %self.config.name, worker_id, "Starting worker");
            tokio::spawn(worker::run(Arc::clone(self), worker_id));
        }
    }

    /// Request stop. Running jobs finish; pending jobs complete with `None`.
    pub fn stop(&self) {
        let drained: Vec<Job> = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.jobs.drain(..).collect()
        };

        info!(
            queue = %self.config.name,
            dropped = drained.len(),
            "Stopping queue"
        );
        for job in drained {
            self.failed.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(job.complete(None));
        }
        self.notify_if_idle();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Whether no job is pending and no worker is running.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.jobs.is_empty() && state.active_workers == 0
    }

    /// Wait until the queue has drained and every worker has exited.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub(super) fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.jobs.len(),
            active_workers: state.active_workers,
            running: self.running.load(Ordering::Relaxed),
            generation: state.generation,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            available_permits: self.permits.available(),
            stopped: state.stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Artifact, OutputTarget};
    use async_trait::async_trait;
    use std::path::PathBuf;

    /// Records the order subjects were produced in.
    struct Recorder {
        order: Mutex<Vec<String>>,
        delay: Duration,
    }

    #[async_trait]
    impl ArtifactProducer for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn produce(&self, subject_id: &str, _target: &OutputTarget) -> Option<Artifact> {
            tokio::time::sleep(self.delay).await;
            self.order.lock().push(subject_id.to_string());
            if subject_id.starts_with("fail") {
                None
            } else {
                Some(Artifact::Remote(format!("https://cdn/{subject_id}")))
            }
        }
    }

    /// Tracks the highest number of concurrent executions.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactProducer for Gauge {
        fn name(&self) -> &'static str {
            "gauge"
        }

        async fn produce(&self, subject_id: &str, _target: &OutputTarget) -> Option<Artifact> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Some(Artifact::Remote(subject_id.to_string()))
        }
    }

    struct Panicker;

    #[async_trait]
    impl ArtifactProducer for Panicker {
        fn name(&self) -> &'static str {
            "panicker"
        }

        async fn produce(&self, subject_id: &str, _target: &OutputTarget) -> Option<Artifact> {
            if subject_id == "boom" {
                panic!("producer exploded");
            }
            Some(Artifact::Remote(subject_id.to_string()))
        }
    }

    fn target() -> OutputTarget {
        OutputTarget::Directory(PathBuf::from("/tmp/unused"))
    }

    fn fast_config(workers: usize) -> QueueConfig {
        QueueConfig {
            name: "test".into(),
            workers,
            pace_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_jobs_run_in_fifo_order() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            delay: Duration::from_millis(2),
        });
        let queue = QueueManager::new(fast_config(1), recorder.clone(), PermitPool::new(1));

        let mut receivers = Vec::new();
        for i in 0..5 {
            let (job, rx) = Job::with_sender(format!("s{i}"), target());
            queue.enqueue(job);
            receivers.push(rx);
        }
        for rx in receivers {
            assert!(rx.await.unwrap().is_some());
        }

        assert_eq!(*recorder.order.lock(), vec!["s0", "s1", "s2", "s3", "s4"]);
    }

    #[tokio::test]
    async fn test_permit_pool_bounds_in_flight_jobs() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue = QueueManager::new(fast_config(10), gauge.clone(), PermitPool::new(3));

        let mut receivers = Vec::new();
        for i in 0..10 {
            let (job, rx) = Job::with_sender(format!("s{i}"), target());
            queue.enqueue(job);
            receivers.push(rx);
        }
        for rx in receivers {
            assert!(rx.await.unwrap().is_some());
        }

        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.stats().completed, 10);
    }

    #[tokio::test]
    async fn test_shared_pool_bounds_across_queues() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = PermitPool::new(2);
        let a = QueueManager::new(fast_config(4), gauge.clone(), pool.clone());
        let b = QueueManager::new(fast_config(4), gauge.clone(), pool);

        let mut receivers = Vec::new();
        for i in 0..8 {
            let (job, rx) = Job::with_sender(format!("s{i}"), target());
            if i % 2 == 0 { a.enqueue(job) } else { b.enqueue(job) }
            receivers.push(rx);
        }
        for rx in receivers {
            rx.await.unwrap();
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_does_not_block_other_queue() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            delay: Duration::from_millis(1),
        });
        let download_pool = PermitPool::new(1);
        let downloads =
            QueueManager::new(fast_config(1), recorder.clone(), download_pool.clone());
        let images = QueueManager::new(fast_config(1), recorder.clone(), PermitPool::new(1));

        // A long download holds the only download permit.
        let held = download_pool.acquire().await.unwrap();
        let (stuck, mut stuck_rx) = Job::with_sender("video", target());
        downloads.enqueue(stuck);
        let (image, image_rx) = Job::with_sender("image", target());
        images.enqueue(image);

        let produced = tokio::time::timeout(Duration::from_secs(2), image_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(produced.is_some());
        assert!(stuck_rx.try_recv().is_err());

        drop(held);
        assert!(stuck_rx.await.unwrap().is_some());
        assert_eq!(*recorder.order.lock(), vec!["image", "video"]);
    }

    #[tokio::test]
    async fn test_panic_becomes_none_and_worker_continues() {
        let queue = QueueManager::new(fast_config(1), Arc::new(Panicker), PermitPool::new(1));

        let (boom, boom_rx) = Job::with_sender("boom", target());
        let (ok, ok_rx) = Job::with_sender("fine", target());
        queue.enqueue(boom);
        queue.enqueue(ok);

        assert_eq!(boom_rx.await.unwrap(), None);
        assert_eq!(ok_rx.await.unwrap(), Some(Artifact::Remote("fine".into())));
        queue.wait_idle().await;
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.stats().available_permits, 1);
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let queue = QueueManager::new(fast_config(1), Arc::new(Panicker), PermitPool::new(1));

        queue.enqueue(Job::new("first", target(), |_| async {
            panic!("callback exploded");
        }));
        let (job, rx) = Job::with_sender("second", target());
        queue.enqueue(job);

        assert!(rx.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drains_to_idle_and_restarts() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            delay: Duration::from_millis(1),
        });
        let queue = QueueManager::new(fast_config(1), recorder, PermitPool::new(1));

        let (job, rx) = Job::with_sender("a", target());
        queue.enqueue(job);
        rx.await.unwrap();
        queue.wait_idle().await;

        let stats = queue.stats();
        assert_eq!(stats.active_workers, 0);
        assert_eq!(stats.generation, 1);

        let (job, rx) = Job::with_sender("b", target());
        queue.enqueue(job);
        assert!(rx.await.unwrap().is_some());
        queue.wait_idle().await;
        assert_eq!(queue.stats().generation, 2);
    }

    #[tokio::test]
    async fn test_enqueue_on_stopped_queue_completes_with_none() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            delay: Duration::from_millis(1),
        });
        let queue = QueueManager::new(fast_config(1), recorder.clone(), PermitPool::new(1));
        queue.stop();
        assert!(queue.is_stopped());

        let (job, rx) = Job::with_sender("late", target());
        queue.enqueue(job);

        assert_eq!(rx.await.unwrap(), None);
        assert!(recorder.order.lock().is_empty());
        assert_eq!(queue.stats().generation, 0);
    }

    #[tokio::test]
    async fn test_failed_production_counts() {
        let recorder = Arc::new(Recorder {
            order: Mutex::new(Vec::new()),
            delay: Duration::from_millis(1),
        });
        let queue = QueueManager::new(fast_config(1), recorder, PermitPool::new(1));
        let (job, rx) = Job::with_sender("fail-1", target());
        queue.enqueue(job);
        assert_eq!(rx.await.unwrap(), None);
        queue.wait_idle().await;
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.pace(), Duration::from_millis(500));
        assert_eq!(PermitPool::new(0).available(), 1);
    }
}
