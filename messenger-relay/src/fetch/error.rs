//! Failure taxonomy for fetch strategies.

use thiserror::Error;

/// Why a strategy did not produce an artifact.
///
/// Strategies return these to the chain, which logs them and moves on; they
/// never escape the chain.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Rate limited, 5xx or a network hiccup. Worth retrying with backoff.
    #[error("transient upstream failure{}: {reason}", fmt_status(*status))]
    TransientUpstream { status: Option<u16>, reason: String },

    /// A client error other than rate limiting. Retrying will not help.
    #[error("permanent upstream failure{}: {reason}", fmt_status(*status))]
    PermanentUpstream { status: Option<u16>, reason: String },

    /// Downloaded content failed size or signature validation.
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// The external tool is not installed or not executable.
    #[error("tool `{tool}` is not available")]
    ToolUnavailable { tool: String },

    /// The external tool ran and failed.
    #[error("tool exited with {}: {stderr}", code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_status(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl FetchError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::TransientUpstream {
            status: None,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentUpstream {
            status: None,
            reason: reason.into(),
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 408, 425, 429 and every 5xx are transient; any other status is permanent.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let reason = body.into();
        if matches!(status, 408 | 425 | 429) || (500..600).contains(&status) {
            Self::TransientUpstream {
                status: Some(status),
                reason,
            }
        } else {
            Self::PermanentUpstream {
                status: Some(status),
                reason,
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. })
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientUpstream { .. } => "transient_upstream",
            Self::PermanentUpstream { .. } => "permanent_upstream",
            Self::InvalidArtifact(_) => "invalid_artifact",
            Self::ToolUnavailable { .. } => "tool_unavailable",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Io(_) => "io",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::from_status(status.as_u16(), e.to_string()),
            // Connect errors, timeouts and dropped bodies are all worth a retry.
            None => Self::transient(e.to_string()),
        }
    }
}
