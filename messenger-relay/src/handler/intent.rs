//! Classification of inbound events into user intents.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::event::{MessagingEvent, WatchVideoPayload};
use crate::utils::text::extract_command;

/// Per-user conversation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    Chat,
    VideoSearch,
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    EnterSearchMode,
    ExitSearchMode,
    Search(String),
    GenerateImage(String),
    ResetConversation,
    Chat(String),
    WatchVideo { video_id: String, title: String },
    UnknownPostback,
    /// Attachments, stickers and other non-text messages.
    NonText,
    /// Echoes and events carrying nothing actionable.
    Ignore,
}

pub const ENTER_SEARCH: &str = "/yt";
pub const EXIT_SEARCH: &str = "yt/";

/// Classify `event` given the sender's current mode.
pub fn classify(event: &MessagingEvent, mode: ChatMode) -> Intent {
    if let Some(postback) = &event.postback {
        return classify_postback(&postback.payload);
    }

    let Some(message) = &event.message else {
        return Intent::Ignore;
    };
    if message.is_echo {
        return Intent::Ignore;
    }
    let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Intent::NonText;
    };

    let lowered = text.to_lowercase();
    if lowered == ENTER_SEARCH {
        return Intent::EnterSearchMode;
    }
    if lowered == EXIT_SEARCH {
        return Intent::ExitSearchMode;
    }

    if let Some((command, rest)) = extract_command(text) {
        match command.as_str() {
            "img" => return Intent::GenerateImage(rest),
            "reset" => return Intent::ResetConversation,
            _ => {}
        }
    }

    match mode {
        ChatMode::VideoSearch => Intent::Search(text.to_string()),
        ChatMode::Chat => Intent::Chat(text.to_string()),
    }
}

fn classify_postback(raw: &str) -> Intent {
    match serde_json::from_str::<WatchVideoPayload>(raw) {
        Ok(payload)
            if payload.action == WatchVideoPayload::ACTION && !payload.video_id.is_empty() =>
        {
            Intent::WatchVideo {
                title: payload
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| "Video".to_string()),
                video_id: payload.video_id,
            }
        }
        Ok(payload) => {
            debug!(action = %payload.action, "Unrecognized postback action");
            Intent::UnknownPostback
        }
        Err(e) => {
            debug!(error = %e, "Unparseable postback payload");
            Intent::UnknownPostback
        }
    }
}
