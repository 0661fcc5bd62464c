//! Messenger webhook routes.
//!
//! `GET` answers the subscription handshake, `POST` receives batched
//! events. Events are handled on spawned tasks so Messenger gets its
//! acknowledgement without waiting on completions or searches.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::handler::event::WebhookPayload;

/// Body Messenger expects after a delivered batch.
pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(verify).post(receive))
}

async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> ApiResult<String> {
    let token_matches = !state.verify_token.is_empty()
        && params.verify_token.as_deref() == Some(state.verify_token.as_str());

    if params.mode.as_deref() == Some("subscribe") && token_matches {
        info!("Webhook verified");
        return Ok(params.challenge.unwrap_or_default());
    }

    warn!(mode = ?params.mode, "Webhook verification rejected");
    Err(ApiError::verification_failed())
}

async fn receive(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<&'static str> {
    if !payload.is_page() {
        debug!(object = %payload.object, "Ignoring non-page webhook");
        return Err(ApiError::unsupported_object(&payload.object));
    }

    for event in payload.first_events() {
        let event = event.clone();
        let handler = state.handler.clone();
        tokio::spawn(async move {
            handler.handle_event(&event).await;
        });
    }

    Ok(EVENT_RECEIVED)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use super::EVENT_RECEIVED;
    use crate::api::routes::create_router;
    use crate::dispatch::notices;
    use crate::testing::app_state;

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_verify_echoes_challenge() {
        let (state, _relay) = app_state("secret");
        let uri = "/api/webhook?hub.mode=subscribe&hub.verify_token=secret&hub.challenge=12345";
        let response = create_router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "12345");
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_token() {
        let (state, _relay) = app_state("secret");
        let uri = "/api/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1";
        let response = create_router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_verify_rejects_missing_params() {
        let (state, _relay) = app_state("secret");
        let response = create_router(state)
            .oneshot(Request::get("/api/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_non_page_object_is_not_found() {
        let (state, _relay) = app_state("secret");
        let request = Request::post("/api/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"object":"instagram","entry":[]}"#))
            .unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_page_event_is_acknowledged_and_handled() {
        let (state, relay) = app_state("secret");
        let raw = r#"{
            "object": "page",
            "entry": [{
                "id": "PAGE",
                "time": 1700000000,
                "messaging": [{
                    "sender": {"id": "u1"},
                    "recipient": {"id": "PAGE"},
                    "message": {"mid": "m1", "attachments": [{"type": "image"}]}
                }]
            }]
        }"#;
        let request = Request::post("/api/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(raw))
            .unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, EVENT_RECEIVED);

        // Handling happens on a spawned task.
        for _ in 0..50 {
            if !relay.texts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(relay.texts(), vec![notices::TEXT_ONLY.to_string()]);
    }
}
