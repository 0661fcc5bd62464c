//! Inbound message handling.
//!
//! The handler classifies each webhook event, answers quick requests inline
//! (chat, search, mode switches) and turns slow ones into queued jobs whose
//! results are delivered by the [`CallbackDispatcher`].

pub mod completion;
pub mod event;
pub mod intent;
pub mod search;

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dispatch::{CallbackDispatcher, DeliveryContext, OperationKind, notices};
use crate::media::MediaKind;
use crate::queue::QueueManager;
use crate::relay::{CardButton, CarouselCard, MessagingRelay};
use crate::utils::text::truncate_text;
use crate::{Error, Result};

use completion::CompletionClient;
use event::{MessagingEvent, WatchVideoPayload};
use intent::{ChatMode, Intent, classify};
use search::{VideoHit, VideoSearch};

/// Messenger truncates card titles beyond this.
const CARD_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Results shown per search.
    pub search_limit: usize,
    /// Parent directory for per-job scratch directories; system temp if unset.
    pub scratch_root: Option<PathBuf>,
    /// Public page for a video id; `{id}` is replaced.
    pub video_url_template: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            search_limit: 5,
            scratch_root: None,
            video_url_template: "https://www.youtube.com/watch?v={id}".to_string(),
        }
    }
}

impl HandlerConfig {
    pub fn video_url(&self, video_id: &str) -> String {
        self.video_url_template.replace("{id}", video_id)
    }
}

/// Collaborators the handler talks to.
pub struct HandlerDeps {
    pub relay: Arc<dyn MessagingRelay>,
    pub completion: Arc<dyn CompletionClient>,
    pub search: Arc<dyn VideoSearch>,
    pub downloads: Arc<QueueManager>,
    pub images: Arc<QueueManager>,
    pub dispatcher: Arc<CallbackDispatcher>,
}

pub struct MessageHandler {
    deps: HandlerDeps,
    config: HandlerConfig,
    modes: DashMap<String, ChatMode>,
}

impl MessageHandler {
    pub fn new(deps: HandlerDeps, config: HandlerConfig) -> Self {
        Self {
            deps,
            config,
            modes: DashMap::new(),
        }
    }

    pub fn mode(&self, user_id: &str) -> ChatMode {
        self.modes.get(user_id).map(|m| *m).unwrap_or_default()
    }

    /// Handle one messaging event. Never fails; errors become user notices.
    pub async fn handle_event(&self, event: &MessagingEvent) {
        let user_id = event.sender.id.as_str();
        if user_id.is_empty() {
            warn!("Ignoring event without sender");
            return;
        }

        let intent = classify(event, self.mode(user_id));
        debug!(user = %user_id, intent = ?intent, "Classified event");

        if let Err(e) = self.dispatch_intent(user_id, intent).await {
            error!(user = %user_id, error = %e, "Failed to handle event");
            let notice = if e.is_timeout() {
                notices::TIMEOUT
            } else {
                notices::FAILURE
            };
            self.notify(user_id, notice).await;
        }
    }

    async fn dispatch_intent(&self, user_id: &str, intent: Intent) -> Result<()> {
        match intent {
            Intent::EnterSearchMode => {
                self.modes.insert(user_id.to_string(), ChatMode::VideoSearch);
                self.deps
                    .relay
                    .deliver_text(user_id, notices::SEARCH_MODE_ON)
                    .await
            }
            Intent::ExitSearchMode => {
                self.modes.insert(user_id.to_string(), ChatMode::Chat);
                self.deps
                    .relay
                    .deliver_text(user_id, notices::SEARCH_MODE_OFF)
                    .await
            }
            Intent::Search(query) => self.search(user_id, &query).await,
            Intent::GenerateImage(prompt) => self.generate_image(user_id, &prompt).await,
            Intent::ResetConversation => {
                self.deps.completion.reset(user_id);
                self.deps
                    .relay
                    .deliver_text(user_id, "Conversation history cleared.")
                    .await
            }
            Intent::Chat(text) => {
                let reply = self.deps.completion.complete(&text, user_id).await?;
                self.deps.relay.deliver_text(user_id, &reply.text).await
            }
            Intent::WatchVideo { video_id, title } => {
                self.watch_video(user_id, &video_id, &title).await
            }
            Intent::UnknownPostback => {
                self.notify(user_id, notices::UNKNOWN_ACTION).await;
                Ok(())
            }
            Intent::NonText => {
                self.notify(user_id, notices::TEXT_ONLY).await;
                Ok(())
            }
            Intent::Ignore => Ok(()),
        }
    }

    async fn search(&self, user_id: &str, query: &str) -> Result<()> {
        let hits = match self
            .deps
            .search
            .search(query, self.config.search_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Video search failed");
                self.notify(user_id, notices::SEARCH_FAILED).await;
                return Ok(());
            }
        };

        info!(user = %user_id, results = hits.len(), "Video search finished");
        if hits.is_empty() {
            self.notify(user_id, notices::NO_RESULTS).await;
            return Ok(());
        }

        let cards: Vec<CarouselCard> = hits.iter().map(|hit| self.card(hit)).collect();
        self.deps.relay.deliver_carousel(user_id, &cards).await
    }

    fn card(&self, hit: &VideoHit) -> CarouselCard {
        let payload = WatchVideoPayload::new(&hit.video_id, &hit.title);
        CarouselCard {
            title: truncate_text(&hit.title, CARD_TITLE_CHARS),
            image_url: hit.thumbnail.clone(),
            buttons: vec![
                CardButton::WebUrl {
                    url: self.config.video_url(&hit.video_id),
                    title: "Watch on YouTube".to_string(),
                },
                CardButton::Postback {
                    title: "Download and send".to_string(),
                    payload: serde_json::to_string(&payload).unwrap_or_default(),
                },
            ],
        }
    }

    fn scratch_dir(&self, prefix: &str) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match &self.config.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)
                    .map_err(|e| Error::io_path("creating scratch root", root, e))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(Error::Io)
    }

    async fn watch_video(&self, user_id: &str, video_id: &str, title: &str) -> Result<()> {
        let identifier = format!("youtube_{video_id}");
        if self
            .deps
            .dispatcher
            .deliver_hosted(user_id, &identifier, title, MediaKind::Video)
            .await
        {
            return Ok(());
        }

        let pending = self.deps.dispatcher.pending();
        if !pending.try_acquire(user_id, OperationKind::Download) {
            self.notify(user_id, notices::BUSY).await;
            return Ok(());
        }

        let scratch = match self.scratch_dir("relay-dl-") {
            Ok(dir) => dir,
            Err(e) => {
                pending.release(user_id, OperationKind::Download);
                return Err(e);
            }
        };

        self.notify(user_id, notices::DOWNLOAD_STARTED).await;

        let context = DeliveryContext::new(OperationKind::Download, MediaKind::Video, identifier)
            .with_title(title)
            .with_source_url(self.config.video_url(video_id))
            .with_scratch(scratch);

        let job = self.deps.dispatcher.job(user_id, video_id, context);
        info!(user = %user_id, video = %video_id, job_id = %job.id, "Queued download");
        self.deps.downloads.enqueue(job);
        Ok(())
    }

    async fn generate_image(&self, user_id: &str, prompt: &str) -> Result<()> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            self.notify(user_id, notices::EMPTY_PROMPT).await;
            return Ok(());
        }

        let pending = self.deps.dispatcher.pending();
        if !pending.try_acquire(user_id, OperationKind::Generation) {
            self.notify(user_id, notices::BUSY).await;
            return Ok(());
        }

        let scratch = match self.scratch_dir("relay-img-") {
            Ok(dir) => dir,
            Err(e) => {
                pending.release(user_id, OperationKind::Generation);
                return Err(e);
            }
        };

        self.notify(user_id, notices::GENERATION_STARTED).await;

        let context = DeliveryContext::new(
            OperationKind::Generation,
            MediaKind::Image,
            format!("generated_{}", uuid::Uuid::new_v4().simple()),
        )
        .with_scratch(scratch);

        let job = self.deps.dispatcher.job(user_id, prompt, context);
        info!(user = %user_id, job_id = %job.id, "Queued image generation");
        self.deps.images.enqueue(job);
        Ok(())
    }

    async fn notify(&self, user_id: &str, text: &str) {
        if let Err(e) = self.deps.relay.deliver_text(user_id, text).await {
            warn!(user = %user_id, error = %e, "Failed to send notice");
        }
    }
}
