//! Local tool strategy: shell out to `yt-dlp`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{RunError, ToolPresence};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{FetchError, FetchStrategy};
use crate::media::{MediaKind, validate_file};
use crate::utils::fs::remove_file_quiet;
use crate::utils::http_client::DEFAULT_USER_AGENT;

/// Configuration for the external downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Binary name or absolute path.
    pub binary_path: String,
    pub user_agent: String,
    /// Kill the process after this many seconds.
    pub timeout_secs: u64,
    pub max_filesize_mb: u64,
    /// Extra arguments inserted before the URL.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Source URL for a subject id; `{id}` is replaced.
    pub source_url_template: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 300,
            max_filesize_mb: 25,
            extra_args: Vec::new(),
            source_url_template: "https://www.youtube.com/watch?v={id}".to_string(),
        }
    }
}

impl ToolConfig {
    pub fn source_url(&self, subject_id: &str) -> String {
        self.source_url_template.replace("{id}", subject_id)
    }

    /// Full argument list for one download.
    pub fn build_args(&self, subject_id: &str, output: &Path) -> Vec<String> {
        let limit = format!("{}M", self.max_filesize_mb);
        let mut args = vec![
            "--no-check-certificates".to_string(),
            "--force-ipv4".to_string(),
            "--user-agent".to_string(),
            self.user_agent.clone(),
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            "--max-filesize".to_string(),
            limit.clone(),
            "-f".to_string(),
            format!("best[ext=mp4][filesize<{limit}]/best[ext=mp4]/best"),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push(self.source_url(subject_id));
        args
    }
}

/// Strategy B: the local `yt-dlp` binary.
pub struct ToolStrategy {
    config: ToolConfig,
    kind: MediaKind,
    min_bytes: u64,
    available: AtomicBool,
}

impl ToolStrategy {
    pub fn new(config: ToolConfig, kind: MediaKind, min_bytes: u64) -> Self {
        Self {
            config,
            kind,
            min_bytes,
            available: AtomicBool::new(false),
        }
    }

    /// Check the binary can be executed. A positive answer is remembered.
    async fn ensure_available(&self) -> Result<(), FetchError> {
        if self.available.load(Ordering::Acquire) {
            return Ok(());
        }
        match process_utils::detect_tool(&self.config.binary_path, "--version").await {
            ToolPresence::Available { version } => {
                debug!(tool = %self.config.binary_path, %version, "External downloader available");
                self.available.store(true, Ordering::Release);
                Ok(())
            }
            ToolPresence::Missing => Err(FetchError::ToolUnavailable {
                tool: self.config.binary_path.clone(),
            }),
        }
    }

    async fn run(&self, subject_id: &str, output: &Path) -> Result<(), FetchError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = process_utils::tokio_command(&self.config.binary_path);
        cmd.args(self.config.build_args(subject_id, output));

        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let run = match process_utils::run_captured(cmd, timeout).await {
            Ok(run) => run,
            Err(RunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.available.store(false, Ordering::Release);
                return Err(FetchError::ToolUnavailable {
                    tool: self.config.binary_path.clone(),
                });
            }
            Err(RunError::TimedOut(after)) => {
                return Err(FetchError::ToolFailed {
                    code: None,
                    stderr: format!("timed out after {}s", after.as_secs()),
                });
            }
            Err(e) => {
                return Err(FetchError::ToolFailed {
                    code: None,
                    stderr: e.to_string(),
                });
            }
        };

        if !run.success() {
            return Err(FetchError::ToolFailed {
                code: run.status.code(),
                stderr: run.stderr_tail.trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FetchStrategy for ToolStrategy {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, subject_id: &str, output: &Path) -> Result<PathBuf, FetchError> {
        self.ensure_available().await?;

        if let Err(e) = self.run(subject_id, output).await {
            remove_file_quiet(output).await;
            return Err(e);
        }

        let check = validate_file(output, self.kind, self.min_bytes).await;
        if !check.is_valid() {
            warn!(subject = %subject_id, reason = %check, "Downloader output failed validation");
            remove_file_quiet(output).await;
            return Err(FetchError::InvalidArtifact(check.to_string()));
        }

        info!(subject = %subject_id, path = %output.display(), "Downloaded artifact via yt-dlp");
        Ok(output.to_path_buf())
    }
}
