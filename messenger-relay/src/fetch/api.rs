//! Hosted API strategy: resolve a direct download URL, then stream it to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::shapes::{self, Extracted};
use super::{FetchError, FetchStrategy};
use crate::domain::RetryPolicy;
use crate::media::{MediaKind, validate_file};
use crate::utils::fs::remove_file_quiet;
use crate::utils::text::truncate_text;

/// Upstream error bodies are cut to this many characters in errors and logs.
const ERROR_BODY_LIMIT: usize = 200;

/// Turns a subject id into a URL the payload can be downloaded from.
#[async_trait]
pub trait DownloadResolver: Send + Sync {
    async fn resolve_download_url(&self, subject_id: &str) -> Result<String, FetchError>;
}

/// Streams a URL to a local file, returning the number of bytes written.
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn download(&self, url: &str, output: &Path, max_bytes: u64) -> Result<u64, FetchError>;
}

/// Settings for the RapidAPI-hosted download resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadApiConfig {
    pub base_url: String,
    pub path: String,
    pub api_key: String,
    pub host: String,
    /// Seconds a payload transfer may go without receiving data.
    pub stall_timeout_secs: u64,
}

impl Default for DownloadApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ytstream-download-youtube-videos.p.rapidapi.com".to_string(),
            path: "/dl".to_string(),
            api_key: String::new(),
            host: "ytstream-download-youtube-videos.p.rapidapi.com".to_string(),
            stall_timeout_secs: DEFAULT_STALL_TIMEOUT.as_secs(),
        }
    }
}

impl DownloadApiConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs.max(1))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Resolver backed by a RapidAPI download service.
pub struct RapidApiResolver {
    client: reqwest::Client,
    config: DownloadApiConfig,
}

impl RapidApiResolver {
    pub fn new(client: reqwest::Client, config: DownloadApiConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl DownloadResolver for RapidApiResolver {
    async fn resolve_download_url(&self, subject_id: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.config.endpoint())
            .query(&[("id", subject_id)])
            .header("x-rapidapi-key", &self.config.api_key)
            .header("x-rapidapi-host", &self.config.host)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(
                status.as_u16(),
                truncate_text(&body, ERROR_BODY_LIMIT),
            ));
        }

        let body: Value = response.json().await?;
        interpret_resolver_body(&body)
    }
}

/// Map a successful resolver response onto a URL or a classified error.
///
/// Some providers answer 200 with a `status` field that says the job is still
/// being prepared (worth retrying) or failed outright.
pub(crate) fn interpret_resolver_body(body: &Value) -> Result<String, FetchError> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase);
    let message = body
        .get("msg")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("no message");

    match status.as_deref() {
        Some("processing") | Some("pending") => {
            return Err(FetchError::transient(format!(
                "download not ready yet: {message}"
            )));
        }
        Some("fail") | Some("failed") | Some("error") => {
            return Err(FetchError::permanent(format!(
                "resolver refused subject: {message}"
            )));
        }
        _ => {}
    }

    match shapes::first_match(shapes::download_url_shapes(), body) {
        Some(Extracted::Url(url)) => Ok(url),
        _ => Err(FetchError::permanent(format!(
            "no download url in response (expected one of: {})",
            shapes::describe(shapes::download_url_shapes())
        ))),
    }
}

/// How long a transfer may go without receiving a byte before it is abandoned.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams payloads over HTTP with a hard size cap.
///
/// The client carries no overall deadline since large payloads legitimately
/// take a while; instead every wait on the peer is bounded by the stall timeout.
pub struct HttpPayloadFetcher {
    client: reqwest::Client,
    stall_timeout: Duration,
}

impl HttpPayloadFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    fn stalled(&self, stage: &str) -> FetchError {
        FetchError::transient(format!(
            "no data from peer for {}ms while {stage}",
            self.stall_timeout.as_millis()
        ))
    }

    async fn stream_to(
        &self,
        url: &str,
        output: &Path,
        max_bytes: u64,
    ) -> Result<u64, FetchError> {
        let response = tokio::time::timeout(self.stall_timeout, self.client.get(url).send())
            .await
            .map_err(|_| self.stalled("waiting for response headers"))??;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(
                status.as_u16(),
                truncate_text(&body, ERROR_BODY_LIMIT),
            ));
        }

        if let Some(len) = response.content_length()
            && len > max_bytes
        {
            return Err(FetchError::permanent(format!(
                "payload of {len} bytes exceeds limit of {max_bytes}"
            )));
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(output).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(self.stall_timeout, stream.next())
                .await
                .map_err(|_| self.stalled("reading the body"))?;
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(FetchError::permanent(format!(
                    "payload exceeded limit of {max_bytes} bytes"
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl PayloadFetcher for HttpPayloadFetcher {
    async fn download(&self, url: &str, output: &Path, max_bytes: u64) -> Result<u64, FetchError> {
        let result = self.stream_to(url, output, max_bytes).await;
        if result.is_err() {
            remove_file_quiet(output).await;
        }
        result
    }
}

/// Strategy A: hosted resolver plus direct download.
pub struct ApiStrategy {
    resolver: Arc<dyn DownloadResolver>,
    fetcher: Arc<dyn PayloadFetcher>,
    resolve_policy: RetryPolicy,
    download_policy: RetryPolicy,
    kind: MediaKind,
    max_bytes: u64,
    min_bytes: u64,
}

impl ApiStrategy {
    pub fn new(
        resolver: Arc<dyn DownloadResolver>,
        fetcher: Arc<dyn PayloadFetcher>,
        kind: MediaKind,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            resolve_policy: RetryPolicy::default(),
            download_policy: RetryPolicy::default(),
            kind,
            max_bytes: 25 * 1024 * 1024,
            min_bytes: 1024,
        }
    }

    pub fn with_resolve_policy(mut self, policy: RetryPolicy) -> Self {
        self.resolve_policy = policy;
        self
    }

    pub fn with_download_policy(mut self, policy: RetryPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    pub fn with_limits(mut self, min_bytes: u64, max_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self.max_bytes = max_bytes;
        self
    }

    /// Resolve with retries on transient failures. Permanent failures and an
    /// exhausted budget are returned as-is.
    async fn resolve_with_retry(&self, subject_id: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.resolver.resolve_download_url(subject_id).await {
                Ok(url) => return Ok(url),
                Err(e) if e.is_transient() && self.resolve_policy.should_retry(attempt) => {
                    let delay = self.resolve_policy.delay_for_attempt(attempt);
                    warn!(
                        subject = %subject_id,
                        attempt = attempt + 1,
                        max_attempts = self.resolve_policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Download URL resolution failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pause_before_retry(&self, attempt: u32) -> bool {
        if !self.download_policy.should_retry(attempt) {
            return false;
        }
        let delay: Duration = self.download_policy.delay_for_attempt(attempt);
        tokio::time::sleep(delay).await;
        true
    }
}

#[async_trait]
impl FetchStrategy for ApiStrategy {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch(&self, subject_id: &str, output: &Path) -> Result<PathBuf, FetchError> {
        let mut attempt = 0;
        loop {
            let url = self.resolve_with_retry(subject_id).await?;
            debug!(subject = %subject_id, attempt = attempt + 1, "Resolved download URL");

            let last_error = match self.fetcher.download(&url, output, self.max_bytes).await {
                Ok(bytes) => {
                    let check = validate_file(output, self.kind, self.min_bytes).await;
                    if check.is_valid() {
                        info!(subject = %subject_id, bytes, "Downloaded artifact via API");
                        return Ok(output.to_path_buf());
                    }
                    remove_file_quiet(output).await;
                    FetchError::InvalidArtifact(check.to_string())
                }
                Err(e) if e.is_transient() => {
                    remove_file_quiet(output).await;
                    e
                }
                Err(e) => {
                    remove_file_quiet(output).await;
                    return Err(e);
                }
            };

            warn!(
                subject = %subject_id,
                attempt = attempt + 1,
                max_attempts = self.download_policy.max_attempts,
                error = %last_error,
                "API download attempt failed"
            );
            if !self.pause_before_retry(attempt).await {
                return Err(last_error);
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::test_support::mp4_bytes;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ScriptedResolver {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<String, FetchError>>>,
        fallback: fn() -> Result<String, FetchError>,
    }

    impl ScriptedResolver {
        fn new(
            script: Vec<Result<String, FetchError>>,
            fallback: fn() -> Result<String, FetchError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                fallback,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DownloadResolver for ScriptedResolver {
        async fn resolve_download_url(&self, _subject_id: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }

    /// Writes a fixed payload regardless of the URL.
    struct StaticFetcher {
        payload: Vec<u8>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PayloadFetcher for StaticFetcher {
        async fn download(&self, _url: &str, output: &Path, _max: u64) -> Result<u64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(output, &self.payload).await?;
            Ok(self.payload.len() as u64)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::linear(3, Duration::from_millis(1))
    }

    fn strategy(
        resolver: Arc<ScriptedResolver>,
        fetcher: Arc<StaticFetcher>,
    ) -> ApiStrategy {
        ApiStrategy::new(resolver, fetcher, MediaKind::Video)
            .with_resolve_policy(fast_policy())
            .with_download_policy(fast_policy())
    }

    fn fetcher(payload: Vec<u8>) -> Arc<StaticFetcher> {
        Arc::new(StaticFetcher {
            payload,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_transient_resolver_tried_exactly_three_times() {
        let temp = TempDir::new().unwrap();
        let resolver = ScriptedResolver::new(vec![], || {
            Err(FetchError::from_status(429, "rate limited"))
        });
        let fetcher = fetcher(mp4_bytes(4096));
        let api = strategy(resolver.clone(), fetcher.clone());

        let err = api
            .fetch("abc12345678", &temp.path().join("out.mp4"))
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(resolver.calls(), 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_immediately() {
        let temp = TempDir::new().unwrap();
        let resolver =
            ScriptedResolver::new(vec![], || Err(FetchError::from_status(404, "not found")));
        let api = strategy(resolver.clone(), fetcher(mp4_bytes(4096)));

        let err = api
            .fetch("abc12345678", &temp.path().join("out.mp4"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "permanent_upstream");
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let temp = TempDir::new().unwrap();
        let resolver = ScriptedResolver::new(
            vec![Err(FetchError::from_status(503, "busy"))],
            || Ok("https://cdn.example/video.mp4".to_string()),
        );
        let api = strategy(resolver.clone(), fetcher(mp4_bytes(4096)));
        let output = temp.path().join("out.mp4");

        let path = api.fetch("abc12345678", &output).await.unwrap();

        assert_eq!(path, output);
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_payload_retries_whole_download() {
        let temp = TempDir::new().unwrap();
        let resolver =
            ScriptedResolver::new(vec![], || Ok("https://cdn.example/video.mp4".to_string()));
        let fetcher = fetcher(vec![0u8; 50]);
        let api = strategy(resolver.clone(), fetcher.clone());
        let output = temp.path().join("out.mp4");

        let err = api.fetch("abc12345678", &output).await.unwrap_err();

        assert_eq!(err.kind(), "invalid_artifact");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(resolver.calls(), 3);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_stalled_transfer_is_abandoned() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Promises 100000 bytes, sends 12, then keeps the connection open.
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 100000\r\n\r\nftypisom0000",
                )
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let temp = TempDir::new().unwrap();
        let output = temp.path().join("stalled.mp4");
        let client = crate::utils::http_client::build_client(
            Duration::ZERO,
            crate::utils::http_client::DEFAULT_USER_AGENT,
        );
        let fetcher = HttpPayloadFetcher::new(client).with_stall_timeout(Duration::from_millis(300));

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            fetcher.download(&format!("http://{addr}/video.mp4"), &output, 1_000_000),
        )
        .await
        .expect("stalled download must not hang");

        let err = result.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
        assert!(!output.exists());
        server.abort();
    }

    #[test]
    fn test_interpret_resolver_body() {
        let url = interpret_resolver_body(&json!({"status": "OK", "link": "https://x"})).unwrap();
        assert_eq!(url, "https://x");

        let err = interpret_resolver_body(&json!({"status": "processing"})).unwrap_err();
        assert!(err.is_transient());

        let err = interpret_resolver_body(&json!({"status": "fail", "msg": "private"})).unwrap_err();
        assert_eq!(err.kind(), "permanent_upstream");

        let err = interpret_resolver_body(&json!({"status": "OK"})).unwrap_err();
        assert!(err.to_string().contains("formats[].url"));
    }

    #[test]
    fn test_endpoint_join() {
        let config = DownloadApiConfig {
            base_url: "https://api.example/".into(),
            path: "/dl".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "https://api.example/dl");
        assert!(!config.is_configured());
    }
}
