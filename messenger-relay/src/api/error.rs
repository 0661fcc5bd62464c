//! Error responses for the webhook surface.
//!
//! Messenger only looks at the status code; the JSON body is for humans
//! poking at the endpoint with curl.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    detail: &'a str,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    /// Stable machine-readable label.
    pub kind: &'static str,
    pub detail: String,
}

impl ApiError {
    fn with(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
        }
    }

    /// Subscription handshake with a wrong mode or token.
    pub fn verification_failed() -> Self {
        Self::with(
            StatusCode::FORBIDDEN,
            "verification_failed",
            "hub.mode or hub.verify_token did not match",
        )
    }

    /// Webhook for an object type this service does not subscribe to.
    pub fn unsupported_object(object: &str) -> Self {
        Self::with(
            StatusCode::NOT_FOUND,
            "unsupported_object",
            format!("object '{object}' is not handled"),
        )
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::with(StatusCode::BAD_REQUEST, "invalid_request", detail)
    }

    pub fn internal() -> Self {
        Self::with(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error occurred",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            detail: &self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if let Error::Validation(detail) = err {
            return ApiError::invalid(detail);
        }
        // Internal details stay in the log.
        tracing::error!(error = %err, "Request failed");
        ApiError::internal()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: ApiError = Error::validation("bad payload").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.detail, "bad payload");

        let err: ApiError = Error::config("secret leaked here").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.detail.contains("secret"));
    }

    #[tokio::test]
    async fn test_response_body() {
        let response = ApiError::unsupported_object("instagram").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "unsupported_object");
        assert!(json["detail"].as_str().unwrap().contains("instagram"));
    }
}
