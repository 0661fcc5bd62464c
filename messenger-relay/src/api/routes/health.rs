//! Liveness and status routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::cache::CacheStats;
use crate::queue::QueueStats;

#[derive(Debug, Serialize)]
pub struct QueuesStatus {
    pub downloads: QueueStats,
    pub images: QueueStats,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub queues: QueuesStatus,
    pub cache: Option<CacheStats>,
    /// Users with a download or generation still in flight.
    pub pending_operations: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(status))
}

/// Plain-text liveness check used by the hosting platform.
pub async fn healthz() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let downloads = state.downloads.stats();
    let images = state.images.stats();
    let status = if downloads.stopped || images.stopped {
        "stopping"
    } else {
        "healthy"
    };

    Ok(Json(StatusResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        queues: QueuesStatus { downloads, images },
        cache: state.cache.as_ref().map(|c| c.stats()),
        pending_operations: state.pending.len(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::testing::app_state;

    #[tokio::test]
    async fn test_healthz() {
        let (state, _relay) = app_state("secret");
        let response = create_router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_status_reports_queues() {
        let (state, _relay) = app_state("secret");
        let response = create_router(state)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["queues"]["downloads"]["pending"], 0);
        assert_eq!(json["pending_operations"], 0);
        assert!(json["cache"].is_null());
    }
}
