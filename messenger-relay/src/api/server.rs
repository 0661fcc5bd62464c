//! Webhook server: router assembly, request tracing and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::Response;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, MakeSpan, OnResponse, TraceLayer};
use tracing::{Level, Span};

use crate::api::routes;
use crate::cache::CacheStore;
use crate::dispatch::PendingFlags;
use crate::error::{Error, Result};
use crate::handler::MessageHandler;
use crate::queue::QueueManager;

/// Paths polled by the hosting platform; tracing them only adds noise.
const UNTRACED_PATHS: [&str; 1] = ["/healthz"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Webhook batches are small; anything bigger is rejected.
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 10000,
            body_limit: 1024 * 1024,
        }
    }
}

impl ApiServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                Error::config(format!(
                    "invalid listen address {}:{}: {e}",
                    self.bind_address, self.port
                ))
            })
    }
}

/// Everything a route handler may touch.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub handler: Arc<MessageHandler>,
    /// Token Messenger must present during webhook verification.
    pub verify_token: String,
    pub downloads: Arc<QueueManager>,
    pub images: Arc<QueueManager>,
    pub cache: Option<Arc<CacheStore>>,
    pub pending: Arc<PendingFlags>,
}

pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &Request| {
                        if UNTRACED_PATHS.contains(&req.uri().path()) {
                            return Span::none();
                        }
                        DefaultMakeSpan::new().level(Level::INFO).make_span(req)
                    })
                    .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                        if !span.is_disabled() {
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .on_response(res, latency, span);
                        }
                    }),
            )
    }

    /// Bind the configured address and serve until the token is cancelled.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Other(format!("cannot listen on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Webhook server listening");
        }

        let shutdown = self.cancel_token.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("Webhook server draining connections");
            })
            .await
            .map_err(|e| Error::Other(format!("webhook server failed: {e}")))
    }
}
