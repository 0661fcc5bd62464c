//! Conversational completion with a bounded in-memory transcript.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::utils::text::truncate_text;
use crate::{Error, Result};

/// Reply from a completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Conversation the reply belongs to, for follow-up turns.
    pub conversation_ref: String,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str, conversation_ref: &str) -> Result<Completion>;

    /// Forget the transcript for `conversation_ref`.
    fn reset(&self, conversation_ref: &str);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Turns kept per conversation.
    pub history_len: usize,
    /// Turns older than this are dropped.
    pub history_ttl_secs: u64,
    /// Character budget for the transcript sent upstream.
    pub history_char_budget: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.mistral.ai/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "mistral-large-latest".to_string(),
            system_prompt: "You are a smart and helpful assistant. Answer the user's questions concisely and usefully.".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            timeout_secs: 30,
            history_len: 10,
            history_ttl_secs: 24 * 60 * 60,
            history_char_budget: 16_000,
        }
    }
}

#[derive(Debug, Clone)]
struct Turn {
    role: &'static str,
    content: String,
    at: Instant,
}

/// Per-conversation transcript, oldest turn first.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: DashMap<String, VecDeque<Turn>>,
}

impl Transcript {
    fn push(&self, conversation: &str, role: &'static str, content: &str, max_len: usize) {
        let mut turns = self.turns.entry(conversation.to_string()).or_default();
        turns.push_back(Turn {
            role,
            content: content.to_string(),
            at: Instant::now(),
        });
        while turns.len() > max_len.max(1) {
            turns.pop_front();
        }
    }

    /// Live turns for `conversation`, trimmed from the oldest end to fit
    /// `char_budget`.
    fn recent(&self, conversation: &str, ttl: Duration, char_budget: usize) -> Vec<Turn> {
        let Some(mut entry) = self.turns.get_mut(conversation) else {
            return Vec::new();
        };
        entry.retain(|t| t.at.elapsed() < ttl);

        let mut total: usize = entry.iter().map(|t| t.content.chars().count()).sum();
        let mut turns: VecDeque<Turn> = entry.iter().cloned().collect();
        while total > char_budget
            && let Some(oldest) = turns.pop_front()
        {
            total -= oldest.content.chars().count();
        }
        turns.into()
    }

    pub fn clear(&self, conversation: &str) {
        self.turns.remove(conversation);
    }

    pub fn len(&self, conversation: &str) -> usize {
        self.turns.get(conversation).map_or(0, |t| t.len())
    }
}

/// Mistral chat completions client.
pub struct MistralClient {
    client: reqwest::Client,
    config: CompletionConfig,
    transcript: Transcript,
}

impl MistralClient {
    pub fn new(client: reqwest::Client, config: CompletionConfig) -> Self {
        Self {
            client,
            config,
            transcript: Transcript::default(),
        }
    }

    fn build_messages(&self, prompt: &str, conversation_ref: &str) -> Vec<Value> {
        let history = self.transcript.recent(
            conversation_ref,
            Duration::from_secs(self.config.history_ttl_secs),
            self.config.history_char_budget,
        );

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({"role": "system", "content": self.config.system_prompt}));
        messages.extend(
            history
                .iter()
                .map(|t| json!({"role": t.role, "content": t.content})),
        );
        messages.push(json!({"role": "user", "content": prompt}));
        messages
    }
}

#[async_trait]
impl CompletionClient for MistralClient {
    async fn complete(&self, prompt: &str, conversation_ref: &str) -> Result<Completion> {
        if self.config.api_key.trim().is_empty() {
            return Err(Error::config("completion API key is not configured"));
        }

        let messages = self.build_messages(prompt, conversation_ref);
        debug!(conversation = %conversation_ref, turns = messages.len(), "Requesting completion");

        let started = Instant::now();
        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
                "max_tokens": self.config.max_tokens,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("completion after {}s", self.config.timeout_secs))
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                "mistral",
                status.as_u16(),
                truncate_text(&body, 200),
            ));
        }

        let body: Value = response.json().await?;
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Other("completion response has no content".to_string()))?
            .to_string();

        self.transcript
            .push(conversation_ref, "user", prompt, self.config.history_len);
        self.transcript
            .push(conversation_ref, "assistant", &text, self.config.history_len);

        info!(
            conversation = %conversation_ref,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );
        Ok(Completion {
            text,
            conversation_ref: conversation_ref.to_string(),
        })
    }

    fn reset(&self, conversation_ref: &str) {
        self.transcript.clear(conversation_ref);
    }
}
