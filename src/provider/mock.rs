//! Mock provider for testing
//!
//! Returns configurable responses without making real API calls.
//! Essential for unit tests, CI pipelines and offline dry runs.

use super::{Completion, Provider, TokenUsage};
use crate::config::{GenerationParams, MockSection};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_RESPONSE: &str = "Mock response";

/// Mock provider that returns predefined responses
#[derive(Clone)]
pub struct MockProvider {
    /// Queue of responses to return (FIFO)
    responses: Arc<Mutex<VecDeque<String>>>,
    /// Default response when queue is empty
    default_response: String,
    /// 1-based call number that fails
    fail_on_call: Option<usize>,
    /// Simulated latency per call
    delay: Option<Duration>,
    /// Calls started so far
    calls: Arc<AtomicUsize>,
    /// Track all prompts received (for assertions)
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    /// Create a new mock provider with default echo behavior
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: DEFAULT_RESPONSE.to_string(),
            fail_on_call: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create with a queue of responses
    pub fn with_responses<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        let provider = Self::new();
        provider
            .responses
            .lock()
            .extend(responses.into_iter().map(Into::into));
        provider
    }

    /// Build from the `mock:` config section
    pub fn from_section(section: &MockSection) -> Self {
        let mut provider = Self::with_responses(section.responses.iter().cloned());
        if let Some(default) = &section.default_response {
            provider.default_response = default.clone();
        }
        provider.fail_on_call = section.fail_on_call;
        provider.delay = section.delay_ms.map(Duration::from_millis);
        provider
    }

    /// Set the default response when queue is empty
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Make the given 1-based call fail
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Sleep this long inside every call (cancellable)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a response to the queue
    pub fn queue_response(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    /// Number of calls started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Get all prompts sent to this provider
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-v1"
    }

    async fn complete(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => anyhow::bail!("mock call {call} cancelled"),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.fail_on_call == Some(call) {
            anyhow::bail!("mock failure on call {call}");
        }

        let text = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone());

        let usage = TokenUsage::estimate(prompt.len(), text.len());
        Ok(Completion::new(text)
            .with_usage(usage)
            .with_finish_reason("stop"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn complete(provider: &MockProvider, prompt: &str) -> Result<Completion> {
        provider
            .complete(prompt, &GenerationParams::default(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_mock_default_response() {
        let provider = MockProvider::new();
        let response = complete(&provider, "Hello").await.unwrap();
        assert_eq!(response.text, "Mock response");
    }

    #[tokio::test]
    async fn test_mock_queued_responses() {
        let provider = MockProvider::with_responses(["First response", "Second response"]);

        assert_eq!(complete(&provider, "a").await.unwrap().text, "First response");
        assert_eq!(complete(&provider, "b").await.unwrap().text, "Second response");
        // Default after queue empty
        assert_eq!(complete(&provider, "c").await.unwrap().text, "Mock response");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let provider = MockProvider::new();
        complete(&provider, "First prompt").await.unwrap();
        complete(&provider, "Second prompt").await.unwrap();

        assert_eq!(provider.prompts(), vec!["First prompt", "Second prompt"]);
    }

    #[tokio::test]
    async fn test_mock_fails_on_call() {
        let provider = MockProvider::new().with_default("ok").failing_on(2);

        assert!(complete(&provider, "1").await.is_ok());
        let err = complete(&provider, "2").await.unwrap_err();
        assert!(err.to_string().contains("call 2"));
        assert!(complete(&provider, "3").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_delay_is_cancellable() {
        let provider = MockProvider::new().with_delay(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider
            .complete("x", &GenerationParams::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_from_section() {
        let provider = MockProvider::from_section(&MockSection {
            enabled: true,
            responses: vec!["one".into()],
            default_response: Some("fallback".into()),
            fail_on_call: Some(3),
            delay_ms: Some(5),
        });
        assert_eq!(provider.default_response, "fallback");
        assert_eq!(provider.fail_on_call, Some(3));
        assert_eq!(provider.delay, Some(Duration::from_millis(5)));
        provider.queue_response("two");
        assert_eq!(provider.responses.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_token_estimation() {
        let provider = MockProvider::new().with_default("Short");
        let response = complete(&provider, "A longer prompt with more tokens")
            .await
            .unwrap();

        let usage = response.usage.unwrap();
        assert!(usage.prompt_tokens > 0);
        assert!(usage.completion_tokens > 0);
        assert_eq!(
            usage.total_tokens,
            usage.prompt_tokens + usage.completion_tokens
        );
    }
}
