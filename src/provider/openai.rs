//! OpenAI provider using the Chat Completions API
//!
//! The wire types here are shared with the Azure provider, which speaks
//! the same protocol against a deployment URL.

use super::{send_json, Completion, Provider, TokenUsage};
use crate::config::{GenerationParams, DEFAULT_OPENAI_MODEL};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// OpenAI API base URL
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider that uses the OpenAI API
pub struct OpenAIProvider {
    /// HTTP client
    client: reqwest::Client,
    /// API key
    api_key: String,
    /// Model to use (default: gpt-4o)
    model: String,
    /// API base, without trailing slash
    base_url: String,
}

impl OpenAIProvider {
    /// Create with a specific API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at an OpenAI-compatible server
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let payload = ChatCompletionRequest::new(Some(self.model.clone()), prompt, params);

        tracing::debug!(
            provider = "openai",
            model = %self.model,
            prompt_len = prompt.len(),
            "Sending request to OpenAI API"
        );

        let request = self
            .client
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&payload);

        let response: ChatCompletionResponse = send_json(request, "openai", cancel).await?;
        response.into_completion("openai", prompt)
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
pub(super) struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl ChatCompletionRequest {
    /// Single user message carrying the rendered prompt
    pub(super) fn new(model: Option<String>, prompt: &str, params: &GenerationParams) -> Self {
        Self {
            model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            stop: params.stop_sequences.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageInfo>,
}

impl ChatCompletionResponse {
    /// First choice as a [`Completion`], estimating usage if absent
    pub(super) fn into_completion(self, provider: &str, prompt: &str) -> Result<Completion> {
        let Some(first) = self.choices.into_iter().next() else {
            anyhow::bail!("{provider} response had no choices");
        };
        let finish_reason = first.finish_reason;
        let text = first.message.content;

        let usage = match self.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::estimate(prompt.len(), text.len()),
        };

        let completion = Completion::new(text).with_usage(usage);
        Ok(match finish_reason {
            Some(reason) => completion.with_finish_reason(reason),
            None => completion,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// TESTS
// ============================================================================
