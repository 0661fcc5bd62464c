//! Messenger webhook payload types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a webhook POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub id: String,
}

/// One messaging event: either a message or a postback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingEvent {
    #[serde(default)]
    pub sender: Participant,
    #[serde(default)]
    pub recipient: Participant,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<InboundMessage>,
    #[serde(default)]
    pub postback: Option<Postback>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Set on copies of messages the page itself sent.
    #[serde(default)]
    pub is_echo: bool,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Postback {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub payload: String,
}

/// Payload of the "download and send" carousel button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchVideoPayload {
    pub action: String,
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl WatchVideoPayload {
    pub const ACTION: &'static str = "watch_video";

    pub fn new(video_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            action: Self::ACTION.to_string(),
            video_id: video_id.into(),
            title: Some(title.into()),
        }
    }
}

impl WebhookPayload {
    pub fn is_page(&self) -> bool {
        self.object == "page"
    }

    /// The first messaging event of every entry, which is all Messenger
    /// ever batches per entry for page subscriptions.
    pub fn first_events(&self) -> impl Iterator<Item = &MessagingEvent> {
        self.entry.iter().filter_map(|e| e.messaging.first())
    }
}
