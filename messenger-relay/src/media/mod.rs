//! Media kinds and container validation.

mod signature;

pub use signature::{ArtifactCheck, Container, detect_container, validate_file};

#[cfg(test)]
pub(crate) use signature::test_support;

use serde::{Deserialize, Serialize};

/// Kind of media an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Attachment type understood by the Messenger Send API.
    pub fn attachment_type(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
        }
    }

    /// Default file extension for artifacts of this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Image => "png",
        }
    }

    /// MIME type used when uploading raw bytes.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Video => "video/mp4",
            Self::Image => "image/png",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.attachment_type())
    }
}
