//! Messenger Send API client.
//!
//! Text is chunked to the platform limit, rate-limited requests are retried
//! honouring `Retry-After`, and local files go up as multipart uploads.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{CarouselCard, MAX_TEXT_CHARS, MessagingRelay};
use crate::media::MediaKind;
use crate::utils::text::{split_text, truncate_text};
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Messenger rejects carousels with more elements than this.
const MAX_CAROUSEL_CARDS: usize = 10;

/// Messenger Send API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    pub graph_url: String,
    pub api_version: String,
    pub page_access_token: String,
    /// Token echoed back during webhook verification.
    pub verify_token: String,
    /// Attachments larger than this are not uploaded.
    pub max_attachment_bytes: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://graph.facebook.com".to_string(),
            api_version: "v13.0".to_string(),
            page_access_token: String::new(),
            verify_token: String::new(),
            max_attachment_bytes: 25 * 1024 * 1024,
        }
    }
}

impl MessengerConfig {
    fn messages_url(&self) -> String {
        format!(
            "{}/{}/me/messages",
            self.graph_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

pub struct MessengerClient {
    config: MessengerConfig,
    client: reqwest::Client,
}

impl MessengerClient {
    pub fn new(client: reqwest::Client, config: MessengerConfig) -> Self {
        Self { config, client }
    }

    /// POST a JSON message. Retries on 429 respecting `Retry-After`.
    async fn send_json(&self, payload: &Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(self.config.messages_url())
                .query(&[("access_token", &self.config.page_access_token)])
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(&response);
                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Messenger rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::upstream("messenger", 429, "rate limit exceeded"));
                }
                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Messenger rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "messenger",
                status.as_u16(),
                graph_error_message(&body),
            ));
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get("Retry-After")?.to_str().ok()?;
    value.trim().parse::<f64>().ok().map(Duration::from_secs_f64)
}

/// Pull `error.message` out of a Graph API error body.
fn graph_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_text(body, 200))
}

pub(crate) fn text_payload(user_id: &str, text: &str) -> Value {
    json!({
        "recipient": {"id": user_id},
        "message": {"text": text},
    })
}

pub(crate) fn remote_media_payload(user_id: &str, url: &str, kind: MediaKind) -> Value {
    json!({
        "recipient": {"id": user_id},
        "message": {
            "attachment": {
                "type": kind.attachment_type(),
                "payload": {"url": url, "is_reusable": true},
            }
        },
    })
}

pub(crate) fn carousel_payload(user_id: &str, cards: &[CarouselCard]) -> Value {
    let elements: Vec<&CarouselCard> = cards.iter().take(MAX_CAROUSEL_CARDS).collect();
    json!({
        "recipient": {"id": user_id},
        "message": {
            "attachment": {
                "type": "template",
                "payload": {
                    "template_type": "generic",
                    "elements": elements,
                },
            }
        },
    })
}

#[async_trait]
impl MessagingRelay for MessengerClient {
    async fn deliver_text(&self, user_id: &str, text: &str) -> Result<()> {
        for chunk in split_text(text, MAX_TEXT_CHARS) {
            self.send_json(&text_payload(user_id, &chunk)).await?;
        }
        Ok(())
    }

    async fn deliver_attachment(&self, user_id: &str, path: &Path, kind: MediaKind) -> Result<()> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io_path("reading attachment", path, e))?;
        if metadata.len() > self.config.max_attachment_bytes {
            return Err(Error::validation(format!(
                "attachment of {} bytes exceeds the {} byte upload limit",
                metadata.len(),
                self.config.max_attachment_bytes
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io_path("reading attachment", path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("attachment.{}", kind.extension()));
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(kind.mime_type())?;

        let message = json!({
            "attachment": {"type": kind.attachment_type(), "payload": {"is_reusable": true}}
        });
        let form = Form::new()
            .text("recipient", json!({"id": user_id}).to_string())
            .text("message", message.to_string())
            .part("filedata", part);

        let response = self
            .client
            .post(self.config.messages_url())
            .query(&[("access_token", &self.config.page_access_token)])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "messenger",
                status.as_u16(),
                graph_error_message(&body),
            ));
        }
        Ok(())
    }

    async fn deliver_remote_media(&self, user_id: &str, url: &str, kind: MediaKind) -> Result<()> {
        self.send_json(&remote_media_payload(user_id, url, kind)).await
    }

    async fn deliver_carousel(&self, user_id: &str, cards: &[CarouselCard]) -> Result<()> {
        if cards.is_empty() {
            return Ok(());
        }
        self.send_json(&carousel_payload(user_id, cards)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::CardButton;

    #[test]
    fn test_messages_url() {
        let config = MessengerConfig::default();
        assert_eq!(
            config.messages_url(),
            "https://graph.facebook.com/v13.0/me/messages"
        );
    }

    #[test]
    fn test_remote_media_payload() {
        let payload = remote_media_payload("42", "https://cdn/x.mp4", MediaKind::Video);
        assert_eq!(payload["recipient"]["id"], "42");
        assert_eq!(payload["message"]["attachment"]["type"], "video");
        assert_eq!(
            payload["message"]["attachment"]["payload"]["url"],
            "https://cdn/x.mp4"
        );
    }

    #[test]
    fn test_carousel_payload_shape() {
        let cards = vec![CarouselCard {
            title: "Clip".into(),
            image_url: Some("https://i.ytimg.com/x.jpg".into()),
            buttons: vec![
                CardButton::WebUrl {
                    url: "https://www.youtube.com/watch?v=abc".into(),
                    title: "Watch".into(),
                },
                CardButton::Postback {
                    title: "Download".into(),
                    payload: "{}".into(),
                },
            ],
        }];
        let payload = carousel_payload("42", &cards);
        let elements = &payload["message"]["attachment"]["payload"]["elements"];
        assert_eq!(elements[0]["title"], "Clip");
        assert_eq!(elements[0]["buttons"][0]["type"], "web_url");
        assert_eq!(elements[0]["buttons"][1]["type"], "postback");
    }

    #[test]
    fn test_graph_error_message() {
        let body = r#"{"error":{"message":"Invalid OAuth access token.","code":190}}"#;
        assert_eq!(graph_error_message(body), "Invalid OAuth access token.");
        assert_eq!(graph_error_message("plain"), "plain");
    }
}
