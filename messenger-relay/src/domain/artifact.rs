//! Artifacts produced by the pipeline and where they should land.

use std::path::{Path, PathBuf};

use crate::media::MediaKind;
use crate::utils::text::sanitize_key;

/// Result of a successful fetch or generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Content downloaded or generated onto the local filesystem.
    Local(PathBuf),
    /// Content already hosted remotely.
    Remote(String),
}

impl Artifact {
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote(_) => None,
        }
    }

    pub fn remote_url(&self) -> Option<&str> {
        match self {
            Self::Local(_) => None,
            Self::Remote(url) => Some(url),
        }
    }
}

/// Where a producer should write its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Write to exactly this path.
    File(PathBuf),
    /// Write into this directory under a name derived from the subject.
    Directory(PathBuf),
}

impl OutputTarget {
    /// Resolve the concrete output path for `subject` of the given kind.
    pub fn resolve(&self, subject: &str, kind: MediaKind) -> PathBuf {
        match self {
            Self::File(path) => path.clone(),
            Self::Directory(dir) => {
                let mut stem = sanitize_key(subject);
                if stem.is_empty() {
                    stem = uuid::Uuid::new_v4().simple().to_string();
                }
                dir.join(format!("{stem}.{}", kind.extension()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_file_target() {
        let target = OutputTarget::File(PathBuf::from("/tmp/x/out.mp4"));
        assert_eq!(
            target.resolve("abc", MediaKind::Video),
            PathBuf::from("/tmp/x/out.mp4")
        );
    }

    #[test]
    fn test_resolve_directory_target() {
        let target = OutputTarget::Directory(PathBuf::from("/tmp/job"));
        assert_eq!(
            target.resolve("abc12345678", MediaKind::Video),
            PathBuf::from("/tmp/job/abc12345678.mp4")
        );
        let generated = target.resolve("a red fox!", MediaKind::Image);
        assert_eq!(generated, PathBuf::from("/tmp/job/aredfox.png"));
    }

    #[test]
    fn test_artifact_accessors() {
        let local = Artifact::Local(PathBuf::from("/tmp/a.mp4"));
        assert!(local.local_path().is_some());
        assert!(local.remote_url().is_none());
        let remote = Artifact::Remote("https://cdn/x.png".into());
        assert_eq!(remote.remote_url(), Some("https://cdn/x.png"));
    }
}
