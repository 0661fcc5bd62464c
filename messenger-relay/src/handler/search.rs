//! Video search.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::text::truncate_text;
use crate::{Error, Result};

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoHit {
    pub video_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
}

#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoHit>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_url: String,
    pub api_key: String,
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.googleapis.com/youtube/v3/search".to_string(),
            api_key: String::new(),
            max_results: 5,
        }
    }
}

/// YouTube Data API v3 search client.
pub struct YouTubeSearch {
    client: reqwest::Client,
    config: SearchConfig,
}

impl YouTubeSearch {
    pub fn new(client: reqwest::Client, config: SearchConfig) -> Self {
        Self { client, config }
    }

    pub fn max_results(&self) -> usize {
        self.config.max_results
    }
}

/// Extract hits from a `search.list` response, skipping items that are not
/// videos.
pub(crate) fn parse_hits(body: &Value) -> Vec<VideoHit> {
    body.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let video_id = item.pointer("/id/videoId")?.as_str()?.to_string();
                    let snippet = item.get("snippet");
                    let title = snippet
                        .and_then(|s| s.get("title"))
                        .and_then(Value::as_str)
                        .unwrap_or("Untitled video")
                        .to_string();
                    let thumbnail = snippet
                        .and_then(|s| s.pointer("/thumbnails/default/url"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    Some(VideoHit {
                        video_id,
                        title,
                        thumbnail,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VideoSearch for YouTubeSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoHit>> {
        if self.config.api_key.is_empty() {
            return Err(Error::config("video search API key is not configured"));
        }

        let limit = limit.clamp(1, 50).to_string();
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("q", query),
                ("maxResults", limit.as_str()),
                ("key", self.config.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "youtube",
                status.as_u16(),
                truncate_text(&body, 200),
            ));
        }

        let body: Value = response.json().await?;
        Ok(parse_hits(&body))
    }
}
