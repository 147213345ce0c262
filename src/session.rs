//! Run session
//!
//! One [`RunSession`] drives exactly one run:
//! extract variables, resolve them, select a provider, loop.
//!
//! `generate` consumes the session, so a session can never produce two
//! outcomes. Cancellation goes through a [`CancelHandle`] taken before the
//! run starts; firing it after the run has finished does nothing.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::{GenerationParams, PlayConfig};
use crate::event_log::{EventKind, EventLog};
use crate::generation::{GenerationLoop, RunOutcome};
use crate::provider::{self, Provider};
use crate::template;
use crate::variables::{self, BindingSet, VariableCollector};

/// Cloneable handle that stops a session's run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Cancel once `after` has elapsed. Must be called inside a tokio runtime.
    pub fn cancel_after(&self, after: Duration) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                // Nothing left to do if someone else got there first
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(after) => token.cancel(),
            }
        })
    }
}

/// Single-use orchestrator for one generation run
#[derive(Debug, Default)]
pub struct RunSession {
    cancel: CancellationToken,
    events: EventLog,
}

impl RunSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record into `log` instead of a private log
    pub fn with_events(mut self, log: EventLog) -> Self {
        self.events = log;
        self
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// Run `template` against the provider selected from `config`
    ///
    /// Variables are resolved before the provider is selected, so a
    /// misconfigured backend is only reported once the operator has
    /// answered. Every early failure comes back as
    /// [`RunOutcome::Failed`] with no results.
    #[instrument(skip_all, fields(max_count = config.max_count))]
    pub async fn generate(
        self,
        template: &str,
        config: &PlayConfig,
        collector: &dyn VariableCollector,
    ) -> RunOutcome {
        let bindings = match self.prepare(template, config.max_count, collector).await {
            Ok(bindings) => bindings,
            Err(outcome) => return self.finish(outcome),
        };

        let provider = match provider::select(config) {
            Ok(provider) => provider,
            Err(e) => return self.finish(RunOutcome::preflight(e)),
        };

        self.drive(
            template,
            &bindings,
            provider.as_ref(),
            &config.generation,
            config.max_count,
        )
        .await
    }

    /// Run `template` against an already constructed provider
    #[instrument(skip_all, fields(provider = provider.name(), max_count = max_count))]
    pub async fn generate_with(
        self,
        template: &str,
        provider: &dyn Provider,
        params: &GenerationParams,
        max_count: u32,
        collector: &dyn VariableCollector,
    ) -> RunOutcome {
        let bindings = match self.prepare(template, max_count, collector).await {
            Ok(bindings) => bindings,
            Err(outcome) => return self.finish(outcome),
        };

        self.drive(template, &bindings, provider, params, max_count)
            .await
    }

    async fn prepare(
        &self,
        template: &str,
        max_count: u32,
        collector: &dyn VariableCollector,
    ) -> Result<BindingSet, RunOutcome> {
        let names = template::extract(template);
        self.events.emit(EventKind::RunStarted {
            max_count,
            variables: names.clone(),
        });

        let bindings = variables::resolve(&names, collector)
            .await
            .map_err(RunOutcome::preflight)?;
        self.events.emit(EventKind::VariablesResolved {
            count: bindings.len(),
        });
        Ok(bindings)
    }

    async fn drive(
        self,
        template: &str,
        bindings: &BindingSet,
        provider: &dyn Provider,
        params: &GenerationParams,
        max_count: u32,
    ) -> RunOutcome {
        self.events.emit(EventKind::ProviderSelected {
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
        });

        let outcome = GenerationLoop::new(provider, params, max_count)
            .with_events(self.events.clone())
            .run(template, bindings, &self.cancel)
            .await;
        self.finish(outcome)
    }

    fn finish(self, outcome: RunOutcome) -> RunOutcome {
        self.events.emit(outcome.event_kind());
        match &outcome {
            RunOutcome::Completed(results) => {
                info!(results = results.len(), "Run completed")
            }
            RunOutcome::Cancelled(results) => {
                info!(results = results.len(), "Run cancelled")
            }
            RunOutcome::Failed { partial, error } => {
                info!(results = partial.len(), error = %error, "Run failed")
            }
        }
        outcome
    }
}
