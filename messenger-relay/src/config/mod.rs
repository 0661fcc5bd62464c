//! Application configuration.
//!
//! Everything is read from the environment (after `.env` is loaded by
//! `main`). Each section starts from its component's defaults and only the
//! variables that are present override them. [`AppConfig::from_lookup`]
//! takes any key lookup so tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::api::ApiServerConfig;
use crate::cache::CacheConfig;
use crate::fetch::{DownloadApiConfig, ImageApiConfig, ToolConfig};
use crate::handler::HandlerConfig;
use crate::handler::completion::CompletionConfig;
use crate::handler::search::SearchConfig;
use crate::queue::QueueConfig;
use crate::relay::{CloudinaryConfig, MessengerConfig};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the daily log files.
    pub dir: PathBuf,
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ApiServerConfig,
    pub messenger: MessengerConfig,
    pub download_api: DownloadApiConfig,
    pub image_api: ImageApiConfig,
    pub tool: ToolConfig,
    pub cache: CacheConfig,
    pub downloads: QueueConfig,
    pub images: QueueConfig,
    /// Downloads allowed in flight at once.
    pub download_permits: usize,
    /// Image generations allowed in flight at once. Separate from downloads
    /// so a download backlog cannot starve `/img`.
    pub image_permits: usize,
    pub hosting: CloudinaryConfig,
    pub completion: CompletionConfig,
    pub search: SearchConfig,
    pub handler: HandlerConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ApiServerConfig::default(),
            messenger: MessengerConfig::default(),
            download_api: DownloadApiConfig::default(),
            image_api: ImageApiConfig::default(),
            tool: ToolConfig::default(),
            cache: CacheConfig::default(),
            downloads: QueueConfig::named("downloads"),
            images: QueueConfig::named("images"),
            download_permits: 3,
            image_permits: 3,
            hosting: CloudinaryConfig::default(),
            completion: CompletionConfig::default(),
            search: SearchConfig::default(),
            handler: HandlerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Reads keys through a lookup function, treating blank values as unset.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn parse<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.get(key) {
            *target = raw
                .parse()
                .map_err(|e| Error::config(format!("invalid value for {key} ({raw}): {e}")))?;
        }
        Ok(())
    }

    fn path(&self, key: &str, target: &mut PathBuf) {
        if let Some(value) = self.get(key) {
            *target = PathBuf::from(value);
        }
    }
}

impl AppConfig {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        let server = &mut config.server;
        env.string("API_BIND_ADDRESS", &mut server.bind_address);
        env.parse("PORT", &mut server.port)?;

        let messenger = &mut config.messenger;
        env.string("MESSENGER_PAGE_ACCESS_TOKEN", &mut messenger.page_access_token);
        env.string("MESSENGER_VERIFY_TOKEN", &mut messenger.verify_token);
        env.string("MESSENGER_GRAPH_URL", &mut messenger.graph_url);
        env.string("MESSENGER_API_VERSION", &mut messenger.api_version);
        env.parse("MESSENGER_MAX_ATTACHMENT_BYTES", &mut messenger.max_attachment_bytes)?;

        // One RapidAPI key serves both the download resolver and image API.
        let download_api = &mut config.download_api;
        env.string("RAPIDAPI_KEY", &mut download_api.api_key);
        env.string("RAPIDAPI_HOST", &mut download_api.host);
        env.string("DOWNLOAD_API_URL", &mut download_api.base_url);
        env.parse(
            "DOWNLOAD_STALL_TIMEOUT_SECS",
            &mut download_api.stall_timeout_secs,
        )?;

        let image_api = &mut config.image_api;
        env.string("RAPIDAPI_KEY", &mut image_api.api_key);
        env.string("IMAGE_API_HOST", &mut image_api.host);
        env.string("IMAGE_API_URL", &mut image_api.base_url);
        env.parse("IMAGE_WIDTH", &mut image_api.width)?;
        env.parse("IMAGE_HEIGHT", &mut image_api.height)?;

        let tool = &mut config.tool;
        env.string("YTDLP_PATH", &mut tool.binary_path);
        env.parse("YTDLP_TIMEOUT_SECS", &mut tool.timeout_secs)?;
        env.parse("YTDLP_MAX_FILESIZE_MB", &mut tool.max_filesize_mb)?;

        env.path("CACHE_DIR", &mut config.cache.dir);
        env.parse("CACHE_MIN_BYTES", &mut config.cache.min_bytes)?;

        env.parse("DOWNLOAD_WORKERS", &mut config.downloads.workers)?;
        env.parse("IMAGE_WORKERS", &mut config.images.workers)?;
        env.parse("QUEUE_PACE_MS", &mut config.downloads.pace_ms)?;
        env.parse("QUEUE_PACE_MS", &mut config.images.pace_ms)?;
        env.parse("MAX_CONCURRENT_JOBS", &mut config.download_permits)?;
        env.parse("MAX_CONCURRENT_JOBS", &mut config.image_permits)?;
        env.parse("DOWNLOAD_PERMITS", &mut config.download_permits)?;
        env.parse("IMAGE_PERMITS", &mut config.image_permits)?;

        let hosting = &mut config.hosting;
        env.string("CLOUDINARY_CLOUD_NAME", &mut hosting.cloud_name);
        env.string("CLOUDINARY_API_KEY", &mut hosting.api_key);
        env.string("CLOUDINARY_API_SECRET", &mut hosting.api_secret);

        let completion = &mut config.completion;
        env.string("MISTRAL_API_KEY", &mut completion.api_key);
        env.string("MISTRAL_API_URL", &mut completion.api_url);
        env.string("MISTRAL_MODEL", &mut completion.model);
        env.parse("MAX_HISTORY_LENGTH", &mut completion.history_len)?;
        env.parse("MAX_HISTORY_AGE", &mut completion.history_ttl_secs)?;

        env.string("YOUTUBE_API_KEY", &mut config.search.api_key);
        env.parse("SEARCH_MAX_RESULTS", &mut config.search.max_results)?;
        config.handler.search_limit = config.search.max_results;

        if let Some(dir) = env.get("SCRATCH_DIR") {
            config.handler.scratch_root = Some(PathBuf::from(dir));
        }

        env.path("LOG_DIR", &mut config.logging.dir);
        config.logging.filter = env.get("LOG_FILTER");

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.messenger.page_access_token.is_empty() {
            return Err(Error::config("MESSENGER_PAGE_ACCESS_TOKEN is required"));
        }
        if self.messenger.verify_token.is_empty() {
            return Err(Error::config("MESSENGER_VERIFY_TOKEN is required"));
        }
        if self.download_permits == 0 || self.image_permits == 0 {
            return Err(Error::config("queue permit counts must be at least 1"));
        }
        if self.downloads.workers == 0 || self.images.workers == 0 {
            return Err(Error::config("queue worker counts must be at least 1"));
        }
        if self.tool.timeout_secs == 0 {
            return Err(Error::config("YTDLP_TIMEOUT_SECS must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("MESSENGER_PAGE_ACCESS_TOKEN", "page-token"),
        ("MESSENGER_VERIFY_TOKEN", "verify"),
    ];

    #[test]
    fn test_defaults_with_required_tokens() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.download_permits, 3);
        assert_eq!(config.image_permits, 3);
        assert_eq!(config.downloads.name, "downloads");
        assert_eq!(config.images.workers, 1);
        assert!(!config.download_api.is_configured());
        assert!(!config.hosting.is_configured());
        assert_eq!(config.tool.binary_path, "yt-dlp");
    }

    #[test]
    fn test_missing_page_token_is_rejected() {
        let err = load(&[("MESSENGER_VERIFY_TOKEN", "verify")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PORT", "8080"),
            ("RAPIDAPI_KEY", "rk"),
            ("RAPIDAPI_HOST", "dl.example"),
            ("MAX_CONCURRENT_JOBS", "5"),
            ("QUEUE_PACE_MS", "50"),
            ("CACHE_DIR", "/var/cache/relay"),
            ("SCRATCH_DIR", "/tmp/relay"),
            ("MAX_HISTORY_LENGTH", "4"),
            ("DOWNLOAD_STALL_TIMEOUT_SECS", "45"),
        ]);
        let config = load(&pairs).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.download_api.api_key, "rk");
        assert_eq!(config.image_api.api_key, "rk");
        assert_eq!(config.download_api.host, "dl.example");
        assert_eq!(config.download_permits, 5);
        assert_eq!(config.image_permits, 5);
        assert_eq!(config.downloads.pace_ms, 50);
        assert_eq!(config.images.pace_ms, 50);
        assert_eq!(config.cache.dir, PathBuf::from("/var/cache/relay"));
        assert_eq!(config.handler.scratch_root, Some(PathBuf::from("/tmp/relay")));
        assert_eq!(config.completion.history_len, 4);
        assert_eq!(
            config.download_api.stall_timeout(),
            std::time::Duration::from_secs(45)
        );
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "  "));
        let config = load(&pairs).unwrap();
        assert_eq!(config.server.port, 10000);
    }

    #[test]
    fn test_invalid_number() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DOWNLOAD_WORKERS", "many"));
        let err = load(&pairs).unwrap_err();
        assert!(err.to_string().contains("DOWNLOAD_WORKERS"));
    }

    #[test]
    fn test_zero_permits_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MAX_CONCURRENT_JOBS", "0"));
        assert!(load(&pairs).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("IMAGE_PERMITS", "0"));
        assert!(load(&pairs).is_err());
    }

    #[test]
    fn test_per_queue_permits_override_shared_limit() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("MAX_CONCURRENT_JOBS", "4"), ("IMAGE_PERMITS", "1")]);
        let config = load(&pairs).unwrap();
        assert_eq!(config.download_permits, 4);
        assert_eq!(config.image_permits, 1);
    }
}
