//! Error types with fix suggestions
//!
//! Error code ranges:
//! - PLAY-001-009: Provider selection errors
//! - PLAY-010-019: Variable resolution errors
//! - PLAY-020-029: Provider call errors
//! - PLAY-030-039: Configuration file / IO errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum PlayError {
    // ─────────────────────────────────────────────────────────────
    // Provider selection (PLAY-001 to PLAY-003)
    // ─────────────────────────────────────────────────────────────
    #[error("PLAY-001: No backend configured")]
    NoBackendConfigured,

    #[error("PLAY-002: Required field '{field}' is missing or blank")]
    ConfigurationInvalid { field: String },

    #[error("PLAY-003: More than one backend enabled: {backends}")]
    ConflictingBackends { backends: String },

    // ─────────────────────────────────────────────────────────────
    // Variable resolution (PLAY-010 to PLAY-013)
    // ─────────────────────────────────────────────────────────────
    #[error("PLAY-010: Generation cancelled while entering variables")]
    VariablesAbandoned,

    #[error("PLAY-011: Variables not set: {}", .names.join(", "))]
    VariablesIncomplete { names: Vec<String> },

    #[error("PLAY-012: Invalid variable name '{name}'")]
    InvalidVariableName { name: String },

    #[error("PLAY-013: Expected NAME=VALUE, got '{raw}'")]
    InvalidAssignment { raw: String },

    // ─────────────────────────────────────────────────────────────
    // Provider calls (PLAY-020)
    // ─────────────────────────────────────────────────────────────
    #[error("PLAY-020: Provider '{provider}' failed on call {call}: {message}")]
    Provider {
        provider: String,
        call: usize,
        message: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Config files / IO (PLAY-030 to PLAY-033)
    // ─────────────────────────────────────────────────────────────
    #[error("PLAY-030: Config error: {reason}")]
    Config { reason: String },

    #[error("PLAY-031: YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("PLAY-032: JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("PLAY-033: IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayError {
    /// The operator backed out of variable entry.
    ///
    /// Not a fault: callers usually skip the error dialog for it.
    pub fn is_abandonment(&self) -> bool {
        matches!(self, PlayError::VariablesAbandoned)
    }

    /// Raised before any provider call was made
    pub fn is_preflight(&self) -> bool {
        !matches!(self, PlayError::Provider { .. })
    }
}

impl FixSuggestion for PlayError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            PlayError::NoBackendConfigured => {
                Some("Enable one backend (azure, ernie, openai, ollama or mock) in the config file")
            }
            PlayError::ConfigurationInvalid { .. } => {
                Some("Fill in the named field or set the matching environment variable")
            }
            PlayError::ConflictingBackends { .. } => {
                Some("Set `enabled: true` on exactly one backend section")
            }
            PlayError::VariablesAbandoned => None,
            PlayError::VariablesIncomplete { .. } => {
                Some("Give every variable a value (an empty value is allowed)")
            }
            PlayError::InvalidAssignment { .. } => {
                Some("Write --var name=value; use name= for an empty value")
            }
            PlayError::InvalidVariableName { .. } => {
                Some("Variable names use letters, digits and underscores: --var name=value")
            }
            PlayError::Provider { .. } => Some("Check endpoint, credentials and quota for the backend"),
            PlayError::Config { .. } => Some("Check the config file path and permissions"),
            PlayError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            PlayError::JsonParse(_) => Some("Check config.json next to the template"),
            PlayError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
