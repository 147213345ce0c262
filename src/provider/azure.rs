//! Azure OpenAI provider
//!
//! Calls a chat deployment at
//! `{endpoint}/openai/deployments/{deployment}/chat/completions`.

use super::openai::{ChatCompletionRequest, ChatCompletionResponse};
use super::{send_json, Completion, Provider};
use crate::config::GenerationParams;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// REST API version sent with every request
const API_VERSION: &str = "2024-02-01";

/// Azure OpenAI chat deployment
pub struct AzureProvider {
    client: reqwest::Client,
    deployment: String,
    /// Resource endpoint, without trailing slash
    endpoint: String,
    secret: String,
}

impl AzureProvider {
    pub fn new(
        deployment: impl Into<String>,
        endpoint: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            deployment: deployment.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, API_VERSION
        )
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    fn model(&self) -> &str {
        &self.deployment
    }

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        // The deployment fixes the model; the body carries none.
        let payload = ChatCompletionRequest::new(None, prompt, params);

        tracing::debug!(
            provider = "azure",
            deployment = %self.deployment,
            prompt_len = prompt.len(),
            "Sending request to Azure OpenAI"
        );

        let request = self
            .client
            .post(self.url())
            .header("api-key", &self.secret)
            .json(&payload);

        let response: ChatCompletionResponse = send_json(request, "azure", cancel).await?;
        response.into_completion("azure", prompt)
    }
}
