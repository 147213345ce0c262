//! Ollama provider for local LLM execution
//!
//! Executes prompts via Ollama's `/api/generate` endpoint with streaming off.

use super::{send_json, Completion, Provider, TokenUsage};
use crate::config::{GenerationParams, DEFAULT_OLLAMA_HOST};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Ollama provider for local LLM execution
pub struct OllamaProvider {
    client: reqwest::Client,
    /// Ollama API host
    host: String,
    /// Model to use
    model: String,
}

impl OllamaProvider {
    /// Create a provider for `model` on the default host
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: DEFAULT_OLLAMA_HOST.to_string(),
            model: model.into(),
        }
    }

    /// Set custom host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/api/generate", self.host)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
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
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions::from(params),
        };

        tracing::debug!(
            provider = "ollama",
            host = %self.host,
            model = %self.model,
            "Sending request to Ollama"
        );

        let request = self.client.post(self.url()).json(&payload);
        let response: GenerateResponse = send_json(request, "ollama", cancel).await?;

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (Some(p), Some(c)) => TokenUsage::new(p, c),
            _ => TokenUsage::estimate(prompt.len(), response.response.len()),
        };
        let completion = Completion::new(response.response).with_usage(usage);

        Ok(match response.done_reason {
            Some(reason) => completion.with_finish_reason(reason),
            None => completion,
        })
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Default, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl From<&GenerationParams> for GenerateOptions {
    fn from(params: &GenerationParams) -> Self {
        Self {
            temperature: params.temperature,
            top_p: params.top_p,
            num_predict: params.max_tokens,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            stop: params.stop_sequences.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}
