//! API route modules.

pub mod health;
pub mod webhook;

use axum::Router;
use axum::routing::get;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/webhook", webhook::router())
        .nest("/api/status", health::router())
        .route("/healthz", get(health::healthz))
        .with_state(state)
}
