//! In-process fakes of the collaborator traits, shared by unit tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::domain::{Artifact, OutputTarget};
use crate::handler::completion::{Completion, CompletionClient};
use crate::handler::search::{VideoHit, VideoSearch};
use crate::media::MediaKind;
use crate::queue::ArtifactProducer;
use crate::relay::{CarouselCard, MAX_TEXT_CHARS, MediaHost, MessagingRelay};
use crate::utils::text::split_text;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text { user: String, text: String },
    Attachment { user: String, path: PathBuf, kind: MediaKind },
    Remote { user: String, url: String, kind: MediaKind },
    Carousel { user: String, cards: Vec<CarouselCard> },
}

/// Records everything it is asked to deliver.
#[derive(Default)]
pub struct FakeRelay {
    sent: Mutex<Vec<Sent>>,
    fail_attachments: AtomicBool,
    fail_remote: AtomicBool,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_attachments() -> Arc<Self> {
        let relay = Self::default();
        relay.fail_attachments.store(true, Ordering::SeqCst);
        Arc::new(relay)
    }

    /// Make `deliver_remote_media` fail from now on.
    pub fn fail_remote_media(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingRelay for FakeRelay {
    async fn deliver_text(&self, user_id: &str, text: &str) -> Result<()> {
        let mut sent = self.sent.lock();
        for chunk in split_text(text, MAX_TEXT_CHARS) {
            sent.push(Sent::Text {
                user: user_id.to_string(),
                text: chunk,
            });
        }
        Ok(())
    }

    async fn deliver_attachment(&self, user_id: &str, path: &Path, kind: MediaKind) -> Result<()> {
        if self.fail_attachments.load(Ordering::SeqCst) {
            return Err(Error::upstream("fake", 413, "attachment too large"));
        }
        self.sent.lock().push(Sent::Attachment {
            user: user_id.to_string(),
            path: path.to_path_buf(),
            kind,
        });
        Ok(())
    }

    async fn deliver_remote_media(&self, user_id: &str, url: &str, kind: MediaKind) -> Result<()> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(Error::upstream("fake", 400, "url could not be fetched"));
        }
        self.sent.lock().push(Sent::Remote {
            user: user_id.to_string(),
            url: url.to_string(),
            kind,
        });
        Ok(())
    }

    async fn deliver_carousel(&self, user_id: &str, cards: &[CarouselCard]) -> Result<()> {
        self.sent.lock().push(Sent::Carousel {
            user: user_id.to_string(),
            cards: cards.to_vec(),
        });
        Ok(())
    }
}

/// Hosts files at `https://host.example/<identifier>`.
#[derive(Default)]
pub struct FakeHost {
    uploads: AtomicUsize,
    fail: bool,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            uploads: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaHost for FakeHost {
    async fn host(&self, _path: &Path, identifier: &str, _kind: MediaKind) -> Result<String> {
        if self.fail {
            return Err(Error::upstream("fake-host", 500, "upload failed"));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://host.example/{identifier}"))
    }
}

#[derive(Default)]
pub struct FakeCompletion {
    reply: Mutex<String>,
    timeout: AtomicBool,
    resets: AtomicUsize,
}

impl FakeCompletion {
    pub fn set_reply(&self, reply: impl Into<String>) {
        *self.reply.lock() = reply.into();
    }

    pub fn fail_with_timeout(&self) {
        self.timeout.store(true, Ordering::SeqCst);
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn complete(&self, _prompt: &str, conversation_ref: &str) -> Result<Completion> {
        if self.timeout.load(Ordering::SeqCst) {
            return Err(Error::Timeout("completion".to_string()));
        }
        Ok(Completion {
            text: self.reply.lock().clone(),
            conversation_ref: conversation_ref.to_string(),
        })
    }

    fn reset(&self, _conversation_ref: &str) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSearch {
    hits: Vec<VideoHit>,
}

impl FakeSearch {
    pub fn with_hits(hits: Vec<VideoHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl VideoSearch for FakeSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<VideoHit>> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

/// Producer that blocks until [`GatedProducer::release`] is called, then
/// fails.
pub struct GatedProducer {
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedProducer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactProducer for GatedProducer {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn produce(&self, _subject_id: &str, _target: &OutputTarget) -> Option<Artifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        None
    }
}

/// Router state wired to fakes, with the relay returned for inspection.
pub fn app_state(verify_token: &str) -> (crate::api::AppState, Arc<FakeRelay>) {
    use crate::dispatch::{CallbackDispatcher, PendingFlags};
    use crate::handler::{HandlerConfig, HandlerDeps, MessageHandler};
    use crate::queue::{PermitPool, QueueConfig, QueueManager};

    let relay = FakeRelay::new();
    let producer = GatedProducer::new();
    let pool = PermitPool::new(1);
    let downloads = QueueManager::new(QueueConfig::named("downloads"), producer.clone(), pool.clone());
    let images = QueueManager::new(QueueConfig::named("images"), producer, pool);
    let pending = Arc::new(PendingFlags::new());
    let dispatcher = Arc::new(CallbackDispatcher::new(relay.clone(), None, pending.clone()));
    let handler = MessageHandler::new(
        HandlerDeps {
            relay: relay.clone(),
            completion: Arc::new(FakeCompletion::default()),
            search: Arc::new(FakeSearch::default()),
            downloads: downloads.clone(),
            images: images.clone(),
            dispatcher,
        },
        HandlerConfig::default(),
    );

    let state = crate::api::AppState {
        start_time: std::time::Instant::now(),
        handler: Arc::new(handler),
        verify_token: verify_token.to_string(),
        downloads,
        images,
        cache: None,
        pending,
    };
    (state, relay)
}
