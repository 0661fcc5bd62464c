//! Outbound integrations: the messaging platform and the media host.

mod hosting;
mod messenger;

pub use hosting::{CloudinaryConfig, CloudinaryHost};
pub use messenger::{MessengerClient, MessengerConfig};

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::media::MediaKind;

/// Messenger caps text messages at this many characters.
pub const MAX_TEXT_CHARS: usize = 2000;

/// Button attached to a carousel card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CardButton {
    WebUrl { url: String, title: String },
    Postback { title: String, payload: String },
}

/// One element of a generic template carousel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarouselCard {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub buttons: Vec<CardButton>,
}

/// Sends messages back to a user. Failures are returned, never panicked.
#[async_trait]
pub trait MessagingRelay: Send + Sync {
    async fn deliver_text(&self, user_id: &str, text: &str) -> Result<()>;

    /// Upload a local file as an attachment.
    async fn deliver_attachment(&self, user_id: &str, path: &Path, kind: MediaKind) -> Result<()>;

    /// Send media the platform fetches from `url`.
    async fn deliver_remote_media(&self, user_id: &str, url: &str, kind: MediaKind) -> Result<()>;

    async fn deliver_carousel(&self, user_id: &str, cards: &[CarouselCard]) -> Result<()>;
}

/// Re-hosts local files at a public URL.
#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn host(&self, path: &Path, identifier: &str, kind: MediaKind) -> Result<String>;
}
