//! Generation loop
//!
//! Runs up to `max_count` sequential completion calls for one rendered
//! prompt. States: `Idle -> Running -> {Completed, Cancelled, Failed}`.
//!
//! - The cancellation token is checked before every call; once it is seen
//!   no further call is dispatched.
//! - Each call races the token and the token is polled first, so once
//!   cancellation is observed an in-flight call is dropped and its result
//!   never appended.
//! - A call that fails once cancellation is set counts as cancelled.
//! - Any other provider error ends the loop at once and is returned
//!   together with every result gathered before it. The loop never retries.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::GenerationParams;
use crate::error::PlayError;
use crate::event_log::{EventKind, EventLog};
use crate::provider::{Provider, TokenUsage};
use crate::template;
use crate::variables::BindingSet;

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    /// Working on the 0-based `iteration`
    Running { iteration: usize },
    Completed,
    Cancelled,
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Output of one completion call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    /// 0-based call index
    pub index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub elapsed_ms: u64,
}

/// Terminal outcome of a run
#[derive(Debug)]
pub enum RunOutcome {
    /// Every requested call succeeded
    Completed(Vec<GenerationResult>),
    /// Stopped by cancellation; holds what finished before it
    Cancelled(Vec<GenerationResult>),
    /// Stopped by an error; holds what finished before it
    Failed {
        partial: Vec<GenerationResult>,
        error: PlayError,
    },
}

impl RunOutcome {
    /// Failure before any call was made
    pub fn preflight(error: PlayError) -> Self {
        Self::Failed {
            partial: Vec::new(),
            error,
        }
    }

    pub fn results(&self) -> &[GenerationResult] {
        match self {
            Self::Completed(results) | Self::Cancelled(results) => results,
            Self::Failed { partial, .. } => partial,
        }
    }

    pub fn into_results(self) -> Vec<GenerationResult> {
        match self {
            Self::Completed(results) | Self::Cancelled(results) => results,
            Self::Failed { partial, .. } => partial,
        }
    }

    pub fn error(&self) -> Option<&PlayError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Failed only because the operator backed out of variable entry
    pub fn is_abandoned(&self) -> bool {
        self.error().is_some_and(PlayError::is_abandonment)
    }

    /// Matching terminal event
    pub fn event_kind(&self) -> EventKind {
        let results = self.results().len();
        match self {
            Self::Completed(_) => EventKind::RunCompleted { results },
            Self::Cancelled(_) => EventKind::RunCancelled { results },
            Self::Failed { error, .. } => EventKind::RunFailed {
                error: error.to_string(),
                results,
            },
        }
    }
}

/// Sequential, cancellable repetition of one completion call
pub struct GenerationLoop<'a> {
    provider: &'a dyn Provider,
    params: &'a GenerationParams,
    max_count: u32,
    events: Option<EventLog>,
    state: LoopState,
}

impl<'a> GenerationLoop<'a> {
    pub fn new(provider: &'a dyn Provider, params: &'a GenerationParams, max_count: u32) -> Self {
        Self {
            provider,
            params,
            max_count,
            events: None,
            state: LoopState::Idle,
        }
    }

    /// Record call events into `log`
    pub fn with_events(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn emit(&self, kind: EventKind) {
        if let Some(log) = &self.events {
            log.emit(kind);
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunOutcome {
        self.state = match &outcome {
            RunOutcome::Completed(_) => LoopState::Completed,
            RunOutcome::Cancelled(_) => LoopState::Cancelled,
            RunOutcome::Failed { .. } => LoopState::Failed,
        };
        debug!(state = ?self.state, results = outcome.results().len(), "Generation loop finished");
        outcome
    }

    /// Render `template` with `bindings` and run the calls
    #[instrument(skip_all, fields(provider = self.provider.name(), max_count = self.max_count))]
    pub async fn run(
        &mut self,
        template: &str,
        bindings: &BindingSet,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        self.state = LoopState::Running { iteration: 0 };
        let prompt = template::render(template, bindings);
        let mut results = Vec::new();

        for index in 0..self.max_count as usize {
            if cancel.is_cancelled() {
                return self.finish(RunOutcome::Cancelled(results));
            }

            self.state = LoopState::Running { iteration: index };
            self.emit(EventKind::CallStarted { index });
            debug!(iteration = index, "Dispatching completion call");

            let started = Instant::now();
            let settled = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.provider.complete(&prompt, self.params, cancel) => Some(result),
            };

            let Some(result) = settled else {
                debug!(iteration = index, "Dropping in-flight call after cancellation");
                self.emit(EventKind::CallDiscarded { index });
                return self.finish(RunOutcome::Cancelled(results));
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(completion) => {
                    self.emit(EventKind::CallCompleted {
                        index,
                        text: completion.text.clone(),
                        tokens_used: completion.usage.map(|u| u.total_tokens),
                        duration_ms: elapsed_ms,
                    });
                    results.push(GenerationResult {
                        index,
                        text: completion.text,
                        usage: completion.usage,
                        finish_reason: completion.finish_reason,
                        elapsed_ms,
                    });
                }
                Err(_) if cancel.is_cancelled() => {
                    debug!(iteration = index, "Dropping call that failed after cancellation");
                    self.emit(EventKind::CallDiscarded { index });
                    return self.finish(RunOutcome::Cancelled(results));
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    warn!(iteration = index, error = %message, "Completion call failed");
                    self.emit(EventKind::CallFailed {
                        index,
                        error: message.clone(),
                    });
                    let error = PlayError::Provider {
                        provider: self.provider.name().to_string(),
                        call: index + 1,
                        message,
                    };
                    return self.finish(RunOutcome::Failed {
                        partial: results,
                        error,
                    });
                }
            }
        }

        self.finish(RunOutcome::Completed(results))
    }
}

/// Run the loop once without keeping the controller around
pub async fn run(
    template: &str,
    bindings: &BindingSet,
    provider: &dyn Provider,
    params: &GenerationParams,
    max_count: u32,
    cancel: &CancellationToken,
) -> RunOutcome {
    GenerationLoop::new(provider, params, max_count)
        .run(template, bindings, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Completion, MockProvider};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Cancels the token while returning call `cancel_during` (1-based)
    struct CancellingProvider {
        calls: AtomicUsize,
        cancel_during: usize,
        token: CancellationToken,
        /// Answer the cancelling call with an error instead of a result
        fail_on_cancel: bool,
    }

    #[async_trait]
    impl Provider for CancellingProvider {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn model(&self) -> &str {
            "test"
        }

        async fn complete(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
            _cancel: &CancellationToken,
        ) -> Result<Completion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.cancel_during {
                self.token.cancel();
                if self.fail_on_cancel {
                    anyhow::bail!("request cancelled");
                }
            }
            Ok(Completion::new(format!("r{call}")))
        }
    }

    async fn run_mock(provider: &MockProvider, max_count: u32) -> RunOutcome {
        run(
            "Say $x",
            &BindingSet::from_pairs([("x", "hi")]),
            provider,
            &GenerationParams::default(),
            max_count,
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_zero_count_makes_no_calls() {
        let provider = MockProvider::new();
        let outcome = run_mock(&provider, 0).await;

        assert!(outcome.is_completed());
        assert!(outcome.results().is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_n_results_in_call_order() {
        let provider = MockProvider::with_responses(["a", "b", "c"]);
        let outcome = run_mock(&provider, 3).await;

        assert!(outcome.is_completed());
        let texts: Vec<_> = outcome.results().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        let indexes: Vec<_> = outcome.results().iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_prompt_is_rendered() {
        let provider = MockProvider::new();
        run_mock(&provider, 2).await;
        assert_eq!(provider.prompts(), vec!["Say hi", "Say hi"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_prior_results() {
        let provider = MockProvider::with_responses(["first"]).failing_on(2);
        let outcome = run_mock(&provider, 5).await;

        match outcome {
            RunOutcome::Failed { partial, error } => {
                assert_eq!(partial.len(), 1);
                assert_eq!(partial[0].text, "first");
                assert!(matches!(error, PlayError::Provider { call: 2, .. }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let provider = MockProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let params = GenerationParams::default();
        let mut generation = GenerationLoop::new(&provider, &params, 3);
        let outcome = generation.run("x", &BindingSet::new(), &cancel).await;

        assert!(outcome.is_cancelled());
        assert!(outcome.results().is_empty());
        assert_eq!(provider.calls(), 0);
        assert_eq!(generation.state(), LoopState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_during_call_stops_next_dispatch() {
        let token = CancellationToken::new();
        let provider = CancellingProvider {
            calls: AtomicUsize::new(0),
            cancel_during: 3,
            token: token.clone(),
            fail_on_cancel: false,
        };
        let log = EventLog::new();

        let params = GenerationParams::default();
        let outcome = GenerationLoop::new(&provider, &params, 5)
            .with_events(log.clone())
            .run("x", &BindingSet::new(), &token)
            .await;

        assert!(outcome.is_cancelled());
        let texts: Vec<_> = outcome.results().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["r1", "r2", "r3"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(log.filter_call(3).is_empty());
    }

    #[tokio::test]
    async fn test_error_after_cancellation_is_cancelled() {
        let token = CancellationToken::new();
        let provider = CancellingProvider {
            calls: AtomicUsize::new(0),
            cancel_during: 2,
            token: token.clone(),
            fail_on_cancel: true,
        };
        let log = EventLog::new();

        let params = GenerationParams::default();
        let outcome = GenerationLoop::new(&provider, &params, 5)
            .with_events(log.clone())
            .run("x", &BindingSet::new(), &token)
            .await;

        assert!(outcome.is_cancelled());
        assert!(outcome.error().is_none());
        let texts: Vec<_> = outcome.results().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["r1"]);
        assert!(log
            .events()
            .iter()
            .any(|e| e.kind == EventKind::CallDiscarded { index: 1 }));
        assert!(!log
            .events()
            .iter()
            .any(|e| matches!(e.kind, EventKind::CallFailed { .. })));
    }

    #[tokio::test]
    async fn test_huge_count_cancelled_before_start() {
        let provider = MockProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let params = GenerationParams::default();
        let outcome = GenerationLoop::new(&provider, &params, u32::MAX)
            .run("x", &BindingSet::new(), &cancel)
            .await;

        assert!(outcome.is_cancelled());
        assert!(outcome.results().is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_call_is_abandoned() {
        let provider = MockProvider::new().with_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let log = EventLog::new();
        let params = GenerationParams::default();
        let outcome = GenerationLoop::new(&provider, &params, 3)
            .with_events(log.clone())
            .run("x", &BindingSet::new(), &cancel)
            .await;

        assert!(outcome.is_cancelled());
        assert!(outcome.results().is_empty());
        assert_eq!(provider.calls(), 1);
        assert!(log
            .events()
            .iter()
            .any(|e| e.kind == EventKind::CallDiscarded { index: 0 }));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let provider = MockProvider::new();
        let params = GenerationParams::default();
        let mut generation = GenerationLoop::new(&provider, &params, 1);
        assert_eq!(generation.state(), LoopState::Idle);

        generation
            .run("x", &BindingSet::new(), &CancellationToken::new())
            .await;
        assert_eq!(generation.state(), LoopState::Completed);
        assert!(generation.state().is_terminal());
    }

    #[test]
    fn test_outcome_event_kind() {
        let outcome = RunOutcome::preflight(PlayError::NoBackendConfigured);
        assert!(matches!(
            outcome.event_kind(),
            EventKind::RunFailed { results: 0, .. }
        ));
        assert!(!outcome.is_abandoned());
        assert!(RunOutcome::preflight(PlayError::VariablesAbandoned).is_abandoned());
    }
}
