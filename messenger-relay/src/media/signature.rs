//! Container signature detection.
//!
//! Only the leading bytes of a file are inspected. This is enough to reject
//! truncated downloads, HTML error pages and empty placeholders.

use std::path::Path;

use tokio::io::AsyncReadExt;

use super::MediaKind;

/// Bytes read from the head of a file for signature detection.
const HEADER_LEN: usize = 16;

/// Container formats recognized by [`detect_container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// ISO base media (mp4, mov, 3gp, m4v).
    IsoBmff,
    /// Matroska / WebM.
    Matroska,
    Flv,
    Png,
    Jpeg,
    Gif,
    Webp,
}

impl Container {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::IsoBmff | Self::Matroska | Self::Flv => MediaKind::Video,
            Self::Png | Self::Jpeg | Self::Gif | Self::Webp => MediaKind::Image,
        }
    }
}

/// Identify the container from the leading bytes of a file.
pub fn detect_container(head: &[u8]) -> Option<Container> {
    if head.len() >= 8 && matches!(&head[4..8], b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free")
    {
        return Some(Container::IsoBmff);
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(Container::Matroska);
    }
    if head.starts_with(b"FLV") {
        return Some(Container::Flv);
    }
    if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(Container::Png);
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(Container::Jpeg);
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Some(Container::Gif);
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        return Some(Container::Webp);
    }
    None
}

/// Outcome of validating an artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCheck {
    Valid(Container),
    Missing,
    TooSmall { size: u64, min: u64 },
    UnknownSignature,
    WrongKind { found: MediaKind },
}

impl ArtifactCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

impl std::fmt::Display for ArtifactCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid(c) => write!(f, "valid {c:?}"),
            Self::Missing => f.write_str("file missing"),
            Self::TooSmall { size, min } => write!(f, "file too small ({size} < {min} bytes)"),
            Self::UnknownSignature => f.write_str("unrecognized container signature"),
            Self::WrongKind { found } => write!(f, "container holds {found}, not the expected kind"),
        }
    }
}

/// Validate that `path` is a plausible artifact of `kind`.
///
/// The file must exist, be strictly larger than `min_bytes` and start with a
/// container signature of the expected kind. Never returns an error.
pub async fn validate_file(path: &Path, kind: MediaKind, min_bytes: u64) -> ArtifactCheck {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return ArtifactCheck::Missing,
    };
    if size <= min_bytes {
        return ArtifactCheck::TooSmall {
            size,
            min: min_bytes,
        };
    }

    let mut head = [0u8; HEADER_LEN];
    let read = match tokio::fs::File::open(path).await {
        Ok(mut file) => read_head(&mut file, &mut head).await,
        Err(_) => return ArtifactCheck::Missing,
    };

    match detect_container(&head[..read]) {
        Some(container) if container.kind() == kind => ArtifactCheck::Valid(container),
        Some(container) => ArtifactCheck::WrongKind {
            found: container.kind(),
        },
        None => ArtifactCheck::UnknownSignature,
    }
}

async fn read_head(file: &mut tokio::fs::File, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    filled
}
