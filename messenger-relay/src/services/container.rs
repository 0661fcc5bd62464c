//! Service container for dependency injection.
//!
//! Wires configuration into the concrete collaborators: HTTP clients,
//! the artifact cache, both fetch producers, one permit pool per queue, the
//! two job queues and the message handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::api::AppState;
use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::dispatch::{CallbackDispatcher, PendingFlags};
use crate::fetch::{
    ApiStrategy, FetchChain, HttpPayloadFetcher, ImageGenerator, RapidApiResolver, ToolStrategy,
};
use crate::handler::completion::MistralClient;
use crate::handler::search::YouTubeSearch;
use crate::handler::{HandlerDeps, MessageHandler};
use crate::media::MediaKind;
use crate::queue::{PermitPool, QueueManager};
use crate::relay::{CloudinaryHost, MediaHost, MessengerClient};
use crate::utils::fs;
use crate::utils::http_client::{DEFAULT_USER_AGENT, build_client};

/// Timeout for JSON API calls. Payload transfers use a client without one.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Send API and hosting calls carry uploads of up to the attachment limit.
const RELAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceContainer {
    pub config: AppConfig,
    pub cache: Arc<CacheStore>,
    pub downloads: Arc<QueueManager>,
    pub images: Arc<QueueManager>,
    pub pending: Arc<PendingFlags>,
    pub handler: Arc<MessageHandler>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let api_client = build_client(API_REQUEST_TIMEOUT, DEFAULT_USER_AGENT);
        let transfer_client = build_client(Duration::ZERO, DEFAULT_USER_AGENT);
        let relay_client = build_client(RELAY_REQUEST_TIMEOUT, DEFAULT_USER_AGENT);

        fs::ensure_dir_all_with_op("creating cache directory", &config.cache.dir).await?;
        let cache = Arc::new(CacheStore::new(config.cache.clone(), MediaKind::Video));

        let min_bytes = config.cache.min_bytes;
        let max_bytes = config.messenger.max_attachment_bytes;

        let mut chain = FetchChain::new(MediaKind::Video).with_cache(cache.clone());
        if config.download_api.is_configured() {
            let resolver = Arc::new(RapidApiResolver::new(
                api_client.clone(),
                config.download_api.clone(),
            ));
            let fetcher = Arc::new(
                HttpPayloadFetcher::new(transfer_client)
                    .with_stall_timeout(config.download_api.stall_timeout()),
            );
            chain = chain.with_strategy(Arc::new(
                ApiStrategy::new(resolver, fetcher, MediaKind::Video)
                    .with_limits(min_bytes, max_bytes),
            ));
        } else {
            warn!("RAPIDAPI_KEY not set; downloads use the local tool only");
        }
        chain = chain.with_strategy(Arc::new(ToolStrategy::new(
            config.tool.clone(),
            MediaKind::Video,
            min_bytes,
        )));
        info!(strategies = ?chain.strategy_names(), "Download chain ready");

        let generator = ImageGenerator::new(api_client.clone(), config.image_api.clone());
        if !config.image_api.is_configured() {
            warn!("Image API key not set; /img requests will fail");
        }

        let downloads = QueueManager::new(
            config.downloads.clone(),
            Arc::new(chain),
            PermitPool::new(config.download_permits),
        );
        let images = QueueManager::new(
            config.images.clone(),
            Arc::new(generator),
            PermitPool::new(config.image_permits),
        );

        let relay = Arc::new(MessengerClient::new(
            relay_client.clone(),
            config.messenger.clone(),
        ));
        let host: Option<Arc<dyn MediaHost>> = if config.hosting.is_configured() {
            Some(Arc::new(CloudinaryHost::new(
                relay_client,
                config.hosting.clone(),
            )))
        } else {
            warn!("Cloudinary not configured; oversized attachments cannot be re-hosted");
            None
        };

        let pending = Arc::new(PendingFlags::new());
        let dispatcher = Arc::new(CallbackDispatcher::new(
            relay.clone(),
            host,
            pending.clone(),
        ));

        let handler = Arc::new(MessageHandler::new(
            HandlerDeps {
                relay,
                completion: Arc::new(MistralClient::new(
                    api_client.clone(),
                    config.completion.clone(),
                )),
                search: Arc::new(YouTubeSearch::new(api_client, config.search.clone())),
                downloads: downloads.clone(),
                images: images.clone(),
                dispatcher,
            },
            config.handler.clone(),
        ));

        info!(
            download_permits = config.download_permits,
            image_permits = config.image_permits,
            download_workers = config.downloads.workers,
            image_workers = config.images.workers,
            "Services initialized"
        );

        Ok(Self {
            config,
            cache,
            downloads,
            images,
            pending,
            handler,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// State shared with the HTTP routes.
    pub fn app_state(&self) -> AppState {
        AppState {
            start_time: Instant::now(),
            handler: self.handler.clone(),
            verify_token: self.config.messenger.verify_token.clone(),
            downloads: self.downloads.clone(),
            images: self.images.clone(),
            cache: Some(self.cache.clone()),
            pending: self.pending.clone(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop both queues and wait for running jobs to finish.
    ///
    /// Pending jobs are completed with no artifact, so every waiting user
    /// still gets a notice.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        self.downloads.stop();
        self.images.stop();

        let drained = tokio::time::timeout(timeout, async {
            self.downloads.wait_idle().await;
            self.images.wait_idle().await;
        })
        .await;

        match drained {
            Ok(()) => info!("Job queues drained"),
            Err(_) => warn!(
                downloads = ?self.downloads.stats(),
                images = ?self.images.stats(),
                "Shutdown timeout reached with jobs still running"
            ),
        }
    }
}
