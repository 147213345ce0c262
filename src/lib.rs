//! promptplay - prompt template runner for LLM completion backends

pub mod config;
pub mod error;
pub mod event_log;
pub mod generation;
pub mod provider;
pub mod session;
pub mod template;
pub mod variables;

pub use config::{Backend, GenerationParams, PlayConfig, TemplateConfig};
pub use error::{FixSuggestion, PlayError};
pub use event_log::{Event, EventKind, EventLog};
pub use generation::{GenerationLoop, GenerationResult, LoopState, RunOutcome};
pub use provider::{Completion, Provider, TokenUsage};
pub use session::{CancelHandle, RunSession};
pub use variables::{BindingSet, Collected, LineCollector, Variable, VariableCollector};
