//! # Provider Abstraction Layer
//!
//! Trait and implementations for completion backends.
//!
//! ## Overview
//!
//! The orchestrator only ever sees [`Provider`]: one call, one rendered
//! prompt, one [`Completion`]. Everything backend-specific lives behind
//! [`select`], which turns a [`PlayConfig`] into a boxed provider.
//!
//! | Backend | Provider | Requires |
//! |---------|----------|----------|
//! | `azure` | [`AzureProvider`] | deployment, endpoint, secret |
//! | `ernie` | [`ErnieProvider`] | client id, secret |
//! | `openai` | [`OpenAIProvider`] | API key |
//! | `ollama` | [`OllamaProvider`] | model (host defaults to localhost) |
//! | `mock` | [`MockProvider`] | Nothing |
//!
//! ## Selecting a provider
//!
//! ```rust
//! use promptplay::config::{MockSection, PlayConfig};
//! use promptplay::provider::select;
//!
//! let config = PlayConfig {
//!     mock: Some(MockSection { enabled: true, ..Default::default() }),
//!     ..Default::default()
//! };
//! let provider = select(&config).unwrap();
//! assert_eq!(provider.name(), "mock");
//!
//! assert!(select(&PlayConfig::default()).is_err());
//! ```
//!
//! Construction never touches the network; connections are made on the
//! first [`Provider::complete`] call.

mod azure;
mod ernie;
mod mock;
mod ollama;
mod openai;

pub use azure::AzureProvider;
pub use ernie::ErnieProvider;
pub use mock::MockProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::{Backend, GenerationParams, PlayConfig};
use crate::error::PlayError;

// ============================================================================
// TOKEN ESTIMATION CONSTANTS
// ============================================================================

/// Average characters per token for mixed content
const CHARS_PER_TOKEN_MIXED: f32 = 3.0;

// ============================================================================
// PROVIDER TRAIT (ASYNC)
// ============================================================================

/// A completion backend
///
/// Implementations should watch `cancel` while waiting on I/O and give up
/// early when it fires; the generation loop also races every call against
/// the same token, so a provider that ignores it is still abandoned.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name (e.g. "azure", "ernie", "mock")
    fn name(&self) -> &str;

    /// Model or deployment the provider talks to
    fn model(&self) -> &str;

    /// Run one completion for an already rendered prompt
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Completion>;
}

// ============================================================================
// RESPONSE TYPES
// ============================================================================

/// Output of one completion call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The generated content
    pub text: String,

    /// Token usage, when the backend reports it
    pub usage: Option<TokenUsage>,

    /// Stop reason (e.g. "stop", "length")
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            finish_reason: None,
        }
    }

    /// Set token usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt (input)
    pub prompt_tokens: u32,

    /// Tokens in the response (output)
    pub completion_tokens: u32,

    /// Total tokens used
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    /// Estimate usage from character counts (when actual counts aren't available)
    pub fn estimate(prompt_len: usize, response_len: usize) -> Self {
        let prompt_tokens = (prompt_len as f32 / CHARS_PER_TOKEN_MIXED).ceil() as u32;
        let completion_tokens = (response_len as f32 / CHARS_PER_TOKEN_MIXED).ceil() as u32;
        Self::new(prompt_tokens, completion_tokens)
    }
}

// ============================================================================
// SELECTION
// ============================================================================

/// Build the provider for the single enabled backend in `config`
///
/// Fails with [`PlayError::NoBackendConfigured`],
/// [`PlayError::ConflictingBackends`] or
/// [`PlayError::ConfigurationInvalid`] naming the first blank field.
pub fn select(config: &PlayConfig) -> Result<Box<dyn Provider>, PlayError> {
    let backend = config.backend()?;
    tracing::debug!(backend = backend.name(), "Selected backend");
    Ok(from_backend(backend))
}

/// Construct a provider from a validated backend
pub fn from_backend(backend: Backend) -> Box<dyn Provider> {
    match backend {
        Backend::Azure {
            deployment,
            endpoint,
            secret,
        } => Box::new(AzureProvider::new(deployment, endpoint, secret)),
        Backend::Ernie { client_id, secret } => Box::new(ErnieProvider::new(client_id, secret)),
        Backend::OpenAi {
            api_key,
            model,
            base_url,
        } => {
            let provider = OpenAIProvider::with_api_key(api_key).with_model(model);
            match base_url {
                Some(url) => Box::new(provider.with_base_url(url)),
                None => Box::new(provider),
            }
        }
        Backend::Ollama { host, model } => {
            Box::new(OllamaProvider::new(model).with_host(host))
        }
        Backend::Mock(section) => Box::new(MockProvider::from_section(&section)),
    }
}

// ============================================================================
// HTTP HELPERS
// ============================================================================

/// Send `request`, decode a JSON body, and give up if `cancel` fires first
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: &str,
    cancel: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => anyhow::bail!("{provider} request cancelled"),
        result = request_json(request, provider) => result,
    }
}

async fn request_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<T> {
    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to send request to {provider}"))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            provider,
            status = %status,
            error = %error_text,
            "API error"
        );
        anyhow::bail!("{provider} API error ({status}): {error_text}");
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {provider} response"))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AzureSection, ErnieSection, MockSection, OllamaSection, OpenAiSection};

    #[test]
    fn test_token_usage_estimate() {
        // With ratio 3.0: 300/3 = 100, 150/3 = 50
        let usage = TokenUsage::estimate(300, 150);

        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.completion_tokens, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_completion_builder() {
        let c = Completion::new("hi")
            .with_usage(TokenUsage::new(2, 1))
            .with_finish_reason("stop");
        assert_eq!(c.text, "hi");
        assert_eq!(c.usage.unwrap().total_tokens, 3);
        assert_eq!(c.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_select_each_backend() {
        let configs = [
            (
                PlayConfig {
                    azure: Some(AzureSection {
                        enabled: true,
                        deployment: "gpt-35".into(),
                        endpoint: "https://x.openai.azure.com".into(),
                        secret: "k".into(),
                    }),
                    ..Default::default()
                },
                "azure",
                "gpt-35",
            ),
            (
                PlayConfig {
                    ernie: Some(ErnieSection {
                        enabled: true,
                        client_id: "id".into(),
                        secret: "s".into(),
                    }),
                    ..Default::default()
                },
                "ernie",
                "ernie-bot-turbo",
            ),
            (
                PlayConfig {
                    openai: Some(OpenAiSection {
                        enabled: true,
                        api_key: "sk".into(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                "openai",
                "gpt-4o",
            ),
            (
                PlayConfig {
                    ollama: Some(OllamaSection {
                        enabled: true,
                        model: "llama3.2".into(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                "ollama",
                "llama3.2",
            ),
            (
                PlayConfig {
                    mock: Some(MockSection {
                        enabled: true,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                "mock",
                "mock-v1",
            ),
        ];

        for (config, name, model) in configs {
            let provider = select(&config).unwrap();
            assert_eq!(provider.name(), name);
            assert_eq!(provider.model(), model);
        }
    }

    #[test]
    fn test_select_reports_missing_field() {
        let config = PlayConfig {
            ollama: Some(OllamaSection {
                enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        match select(&config) {
            Err(PlayError::ConfigurationInvalid { field }) => assert_eq!(field, "ollama.model"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_select_nothing_enabled() {
        assert!(matches!(
            select(&PlayConfig::default()),
            Err(PlayError::NoBackendConfigured)
        ));
    }
}
