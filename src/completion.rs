//! LLM completion seam.
//!
//! [`Completer`] is the only thing the lounge and the chat service know about
//! the model. [`OpenAiCompleter`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint. [`ScriptedCompleter`] replays canned answers
//! so the turn logic can be exercised without a network.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{ChatError, Result};
use crate::providers::{OpenAIChatMessage, OpenAIChatRequest, OpenAIChatResponse};

/// One personality call: system prompt, user prompt and sampling knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

#[async_trait]
pub trait Completer: Send + Sync {
    /// Return the completion text, trimmed and non-empty.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP client
// ---------------------------------------------------------------------------

pub struct OpenAiCompleter {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl OpenAiCompleter {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        // Without a key every call fails, and callers post their fallback line.
        let api_key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;

        let body = OpenAIChatRequest {
            model: request.model,
            messages: vec![
                OpenAIChatMessage::system(request.system),
                OpenAIChatMessage::user(request.user),
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            presence_penalty: request.presence_penalty,
            frequency_penalty: request.frequency_penalty,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Http { status: status.as_u16(), body });
        }

        let parsed: OpenAIChatResponse = response.json().await?;
        if let Some(usage) = &parsed.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "completion usage"
            );
        }
        parsed.first_text().ok_or(ChatError::EmptyCompletion)
    }
}

// ---------------------------------------------------------------------------
// Scripted completer
// ---------------------------------------------------------------------------

/// Replays queued replies in order and records every request it sees.
///
/// An exhausted queue answers with the `default` reply, or with
/// [`ChatError::EmptyCompletion`] when none is set.
#[derive(Default)]
pub struct ScriptedCompleter {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    default: Option<String>,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self { default: Some(text.into()), ..Self::default() }
    }

    /// Fail every call.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, text: impl Into<String>) -> &Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(text.into()));
        }
        self
    }

    pub fn push_err(&self, reason: impl Into<String>) -> &Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(reason.into()));
        }
        self
    }

    /// Snapshot of the requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.seen.lock().map_err(|_| ChatError::LockPoisoned)?.push(request);
        let next = self.replies.lock().map_err(|_| ChatError::LockPoisoned)?.pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(ChatError::Http { status: 500, body: reason }),
            None => self.default.clone().ok_or(ChatError::EmptyCompletion),
        }
    }
}
