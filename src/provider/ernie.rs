//! Baidu ERNIE-Bot-Turbo provider
//!
//! Authenticates with client credentials. The OAuth access token is fetched
//! on the first call, not at construction, and reused until the API reports
//! it invalid or expired.

use super::{send_json, Completion, Provider, TokenUsage};
use crate::config::GenerationParams;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// OAuth token endpoint
const TOKEN_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

/// ERNIE-Bot-Turbo chat endpoint
const CHAT_URL: &str = "https://aip.baidubce.com/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/eb-instant";

/// Model label reported by [`Provider::model`]
const MODEL: &str = "ernie-bot-turbo";

/// Error codes meaning the access token must be refreshed
const TOKEN_ERROR_CODES: [i64; 2] = [110, 111];

/// Baidu ERNIE provider
pub struct ErnieProvider {
    client: reqwest::Client,
    client_id: String,
    secret: String,
    /// Cached access token
    token: Mutex<Option<String>>,
}

impl ErnieProvider {
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            secret: secret.into(),
            token: Mutex::new(None),
        }
    }

    /// Cached token, or a fresh one from the OAuth endpoint
    async fn access_token(&self, cancel: &CancellationToken) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        tracing::debug!(provider = "ernie", "Fetching access token");
        let request = self.client.post(TOKEN_URL).query(&[
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.secret.as_str()),
        ]);
        let response: TokenResponse = send_json(request, "ernie", cancel).await?;

        let token = match response.access_token {
            Some(token) if !token.is_empty() => token,
            _ => anyhow::bail!(
                "ernie token request rejected: {}",
                response
                    .error_description
                    .or(response.error)
                    .unwrap_or_else(|| "no access_token in response".to_string())
            ),
        };

        *cached = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl Provider for ErnieProvider {
    fn name(&self) -> &str {
        "ernie"
    }

    fn model(&self) -> &str {
        MODEL
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let token = self
            .access_token(cancel)
            .await
            .context("Failed to obtain ERNIE access token")?;

        let payload = ErnieChatRequest::new(prompt, params);
        tracing::debug!(
            provider = "ernie",
            prompt_len = prompt.len(),
            "Sending request to ERNIE"
        );

        let request = self
            .client
            .post(CHAT_URL)
            .query(&[("access_token", token.as_str())])
            .json(&payload);
        let response: ErnieChatResponse = send_json(request, "ernie", cancel).await?;

        if let Some(code) = response.error_code {
            if TOKEN_ERROR_CODES.contains(&code) {
                self.token.lock().await.take();
            }
            anyhow::bail!(
                "ernie API error {}: {}",
                code,
                response.error_msg.unwrap_or_default()
            );
        }

        response.into_completion(prompt)
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErnieChatRequest {
    messages: Vec<ErnieMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    /// ERNIE's single repetition penalty, in [1.0, 2.0]
    #[serde(skip_serializing_if = "Option::is_none")]
    penalty_score: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

impl ErnieChatRequest {
    fn new(prompt: &str, params: &GenerationParams) -> Self {
        Self {
            messages: vec![ErnieMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            // ERNIE rejects 0.0; its range is (0, 1]
            temperature: params.temperature.map(|t| t.clamp(0.01, 1.0)),
            top_p: params.top_p.map(|p| p.clamp(0.0, 1.0)),
            penalty_score: params
                .frequency_penalty
                .or(params.presence_penalty)
                .map(|p| (1.0 + p).clamp(1.0, 2.0)),
            stop: params.stop_sequences.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErnieMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErnieChatResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    usage: Option<ErnieUsage>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
}

impl ErnieChatResponse {
    /// Successful body as a [`Completion`]; `error_code` is handled by the caller
    fn into_completion(self, prompt: &str) -> Result<Completion> {
        let Some(text) = self.result else {
            anyhow::bail!("ernie response had neither result nor error_code");
        };
        let usage = match self.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::estimate(prompt.len(), text.len()),
        };
        let completion = Completion::new(text).with_usage(usage);

        Ok(if self.is_truncated {
            completion.with_finish_reason("length")
        } else {
            completion
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErnieUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ernie_provider_name() {
        let provider = ErnieProvider::new("id", "secret");
        assert_eq!(provider.name(), "ernie");
        assert_eq!(provider.model(), MODEL);
    }

    #[tokio::test]
    async fn test_construction_fetches_no_token() {
        let provider = ErnieProvider::new("id", "secret");
        assert!(provider.token.lock().await.is_none());
    }

    #[test]
    fn test_request_clamps_params() {
        let params = GenerationParams {
            temperature: Some(0.0),
            frequency_penalty: Some(0.5),
            ..Default::default()
        };
        let json = serde_json::to_value(ErnieChatRequest::new("hi", &params)).unwrap();

        assert_eq!(json["messages"][0]["content"], "hi");
        assert!((json["temperature"].as_f64().unwrap() - 0.01).abs() < 1e-6);
        assert!((json["penalty_score"].as_f64().unwrap() - 1.5).abs() < 1e-6);
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn test_parse_error_response() {
        let response: ErnieChatResponse =
            serde_json::from_str(r#"{"error_code":110,"error_msg":"Access token invalid"}"#)
                .unwrap();
        assert_eq!(response.error_code, Some(110));
        assert!(response.result.is_none());
    }

    #[test]
    fn test_parse_success_response() {
        let response: ErnieChatResponse = serde_json::from_str(
            r#"{"id":"as-1","result":"你好","is_truncated":false,
                "usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )
        .unwrap();
        assert_eq!(response.result.as_deref(), Some("你好"));

        let completion = response.into_completion("hi").unwrap();
        assert_eq!(completion.text, "你好");
        assert_eq!(completion.usage, Some(TokenUsage::new(3, 2)));
    }

    #[test]
    fn test_response_without_result_is_error() {
        let response: ErnieChatResponse =
            serde_json::from_str(r#"{"id":"as-2","is_truncated":false}"#).unwrap();
        let err = response.into_completion("hi").unwrap_err();
        assert!(err.to_string().contains("neither result nor error_code"));
    }
}
