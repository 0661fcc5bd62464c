//! Text-to-image generation through a hosted API.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::FetchError;
use super::shapes::{self, Extracted};
use crate::domain::{Artifact, OutputTarget, RetryPolicy};
use crate::media::{MediaKind, validate_file};
use crate::queue::ArtifactProducer;
use crate::utils::fs::remove_file_quiet;
use crate::utils::text::truncate_text;

/// Settings for the image generation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageApiConfig {
    pub base_url: String,
    pub path: String,
    pub api_key: String,
    pub host: String,
    pub width: u32,
    pub height: u32,
    /// Decoded images of this size or smaller are rejected.
    pub min_bytes: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ImageApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chatgpt-42.p.rapidapi.com".to_string(),
            path: "/texttoimage".to_string(),
            api_key: String::new(),
            host: "chatgpt-42.p.rapidapi.com".to_string(),
            width: 512,
            height: 512,
            min_bytes: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl ImageApiConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Produces images from prompts. Hosted URLs are passed through untouched;
/// inline payloads are decoded to disk and validated.
pub struct ImageGenerator {
    client: reqwest::Client,
    config: ImageApiConfig,
}

impl ImageGenerator {
    pub fn new(client: reqwest::Client, config: ImageApiConfig) -> Self {
        Self { client, config }
    }

    async fn request(&self, prompt: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .post(self.config.endpoint())
            .header("x-rapidapi-key", &self.config.api_key)
            .header("x-rapidapi-host", &self.config.host)
            .json(&json!({
                "text": prompt,
                "width": self.config.width,
                "height": self.config.height,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status.as_u16(), truncate_text(&body, 200)));
        }
        Ok(response.json().await?)
    }

    async fn request_with_retry(&self, prompt: &str) -> Result<Value, FetchError> {
        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.request(prompt).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(attempt = attempt + 1, error = %e, "Image generation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Generate an image for `prompt`, writing inline payloads to `output`.
    pub async fn generate(&self, prompt: &str, output: &Path) -> Result<Artifact, FetchError> {
        let body = self.request_with_retry(prompt).await?;
        self.materialize(&body, output).await
    }

    /// Turn a generator response into an artifact.
    pub(crate) async fn materialize(
        &self,
        body: &Value,
        output: &Path,
    ) -> Result<Artifact, FetchError> {
        match shapes::first_match(shapes::image_shapes(), body) {
            Some(Extracted::Url(url)) => Ok(Artifact::Remote(url)),
            Some(Extracted::Base64(payload)) => {
                let bytes = STANDARD
                    .decode(payload.trim())
                    .map_err(|e| FetchError::InvalidArtifact(format!("bad base64 payload: {e}")))?;
                if let Some(parent) = output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(output, &bytes).await?;

                let check = validate_file(output, MediaKind::Image, self.config.min_bytes).await;
                if !check.is_valid() {
                    remove_file_quiet(output).await;
                    return Err(FetchError::InvalidArtifact(check.to_string()));
                }
                Ok(Artifact::Local(output.to_path_buf()))
            }
            None => Err(FetchError::permanent(format!(
                "no image in response (expected one of: {})",
                shapes::describe(shapes::image_shapes())
            ))),
        }
    }
}

#[async_trait]
impl ArtifactProducer for ImageGenerator {
    fn name(&self) -> &'static str {
        "image-generator"
    }

    async fn produce(&self, subject_id: &str, target: &OutputTarget) -> Option<Artifact> {
        let output = target.resolve(subject_id, MediaKind::Image);
        match self.generate(subject_id, &output).await {
            Ok(artifact) => {
                info!(prompt = %truncate_text(subject_id, 60), "Image generated");
                Some(artifact)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Image generation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::test_support::png_bytes;
    use tempfile::TempDir;

    fn generator() -> ImageGenerator {
        let client = crate::utils::http_client::build_client(
            std::time::Duration::ZERO,
            crate::utils::http_client::DEFAULT_USER_AGENT,
        );
        ImageGenerator::new(client, ImageApiConfig::default())
    }

    #[tokio::test]
    async fn test_url_response_is_remote() {
        let temp = TempDir::new().unwrap();
        let body = json!({"generated_image": "https://img.example/fox.png"});
        let artifact = generator()
            .materialize(&body, &temp.path().join("fox.png"))
            .await
            .unwrap();
        assert_eq!(artifact, Artifact::Remote("https://img.example/fox.png".into()));
    }

    #[tokio::test]
    async fn test_base64_response_is_written_and_validated() {
        let temp = TempDir::new().unwrap();
        let encoded = STANDARD.encode(png_bytes(2048));
        let body = json!({"data": format!("data:image/png;base64,{encoded}")});
        let output = temp.path().join("fox.png");

        let artifact = generator().materialize(&body, &output).await.unwrap();

        assert_eq!(artifact, Artifact::Local(output.clone()));
        assert_eq!(tokio::fs::metadata(&output).await.unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_undersized_payload_rejected() {
        let temp = TempDir::new().unwrap();
        let body = json!({"b64_json": STANDARD.encode([0u8; 50])});
        let output = temp.path().join("tiny.png");

        let err = generator().materialize(&body, &output).await.unwrap_err();

        assert_eq!(err.kind(), "invalid_artifact");
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_unrecognized_response() {
        let temp = TempDir::new().unwrap();
        let err = generator()
            .materialize(&json!({"ok": true}), &temp.path().join("x.png"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permanent_upstream");
    }
}
