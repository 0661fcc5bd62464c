//! Cloudinary-backed media host.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use super::MediaHost;
use crate::media::MediaKind;
use crate::utils::text::{sanitize_key, truncate_text};
use crate::{Error, Result};

/// Cloudinary account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudinaryConfig {
    pub upload_url: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Transformation applied on upload to keep deliveries small.
    pub transformation: String,
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            upload_url: "https://api.cloudinary.com/v1_1".to_string(),
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            transformation: "c_scale,w_320/q_auto:low".to_string(),
        }
    }
}

impl CloudinaryConfig {
    pub fn is_configured(&self) -> bool {
        !self.cloud_name.is_empty() && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    fn endpoint(&self, kind: MediaKind) -> String {
        format!(
            "{}/{}/{}/upload",
            self.upload_url.trim_end_matches('/'),
            self.cloud_name,
            kind.attachment_type()
        )
    }
}

/// Signs upload parameters: sorted `key=value` pairs joined by `&`, followed
/// by the API secret, hashed with SHA-256.
pub(crate) fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct CloudinaryHost {
    config: CloudinaryConfig,
    client: reqwest::Client,
}

impl CloudinaryHost {
    pub fn new(client: reqwest::Client, config: CloudinaryConfig) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl MediaHost for CloudinaryHost {
    async fn host(&self, path: &Path, identifier: &str, kind: MediaKind) -> Result<String> {
        if !self.config.is_configured() {
            return Err(Error::config("media host credentials are not configured"));
        }

        let public_id = match sanitize_key(identifier) {
            id if id.is_empty() => uuid::Uuid::new_v4().simple().to_string(),
            id => id,
        };
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let params = [
            ("overwrite", "true".to_string()),
            ("public_id", public_id.clone()),
            ("timestamp", timestamp),
            ("transformation", self.config.transformation.clone()),
        ];
        let signature = sign(&params, &self.config.api_secret);

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::io_path("reading upload", path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{public_id}.{}", kind.extension()));

        let mut form = Form::new().part(
            "file",
            Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(kind.mime_type())?,
        );
        for (key, value) in params {
            form = form.text(key, value);
        }
        form = form
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .client
            .post(self.config.endpoint(kind))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::upstream(
                "cloudinary",
                status.as_u16(),
                truncate_text(&body, 200),
            ));
        }

        let value: Value = serde_json::from_str(&body)?;
        let url = value
            .get("secure_url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("upload response has no secure_url".to_string()))?;
        info!(public_id = %public_id, kind = %kind, "Re-hosted media");
        Ok(url.to_string())
    }
}
