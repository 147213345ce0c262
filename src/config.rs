//! Playground configuration
//!
//! One section per backend, each independently switched with `enabled`.
//! Provider selection (see [`crate::provider::select`]) turns the single
//! enabled section into a validated [`Backend`].
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`AZURE_OPENAI_API_KEY`, `ERNIE_CLIENT_SECRET`, ...)
//! 2. Config file (`promptplay.yaml`)
//! 3. Defaults
//!
//! ```yaml
//! max_count: 3
//! generation:
//!   temperature: 0.7
//!   max_tokens: 256
//! azure:
//!   enabled: true
//!   deployment: gpt-35-turbo
//!   endpoint: https://my-resource.openai.azure.com
//!   secret: "..."
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PlayError, Result};

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "promptplay.yaml";

/// Default number of generations per run
pub const DEFAULT_MAX_COUNT: u32 = 1;

/// Default Ollama host
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Default OpenAI model
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

fn default_max_count() -> u32 {
    DEFAULT_MAX_COUNT
}

/// Any integer; negatives clamp to 0, oversized values to `u32::MAX`
fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, i64::from(u32::MAX)) as u32)
}

fn default_ollama_host() -> String {
    DEFAULT_OLLAMA_HOST.to_string()
}

fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ernie: Option<ErnieSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAiSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<OllamaSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockSection>,

    /// Parameters shared by every backend
    #[serde(default)]
    pub generation: GenerationParams,

    /// How many completions one run requests; zero or negative means none
    #[serde(default = "default_max_count", deserialize_with = "deserialize_count")]
    pub max_count: u32,
}

impl Default for PlayConfig {
    fn default() -> Self {
        Self {
            azure: None,
            ernie: None,
            openai: None,
            ollama: None,
            mock: None,
            generation: GenerationParams::default(),
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

/// Azure OpenAI chat deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AzureSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub deployment: String,
    /// e.g. `https://my-resource.openai.azure.com`
    #[serde(default)]
    pub endpoint: String,
    /// API key
    #[serde(default)]
    pub secret: String,
}

/// Baidu ERNIE-Bot-Turbo (client credentials)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErnieSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub secret: String,
}

/// OpenAI (or compatible) chat completions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAiSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    /// Override for compatible servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for OpenAiSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            model: default_openai_model(),
            base_url: None,
        }
    }
}

/// Local Ollama server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OllamaSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default)]
    pub model: String,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_ollama_host(),
            model: String::new(),
        }
    }
}

/// Scripted backend for dry runs and tests
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MockSection {
    #[serde(default)]
    pub enabled: bool,
    /// Replies returned in order, then `default_response`
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<String>,
    /// 1-based call number that fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_on_call: Option<usize>,
    /// Simulated latency per call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// Generation parameters; `None` leaves the backend default in place
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

/// The one backend a run talks to, with its fields validated
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Azure {
        deployment: String,
        endpoint: String,
        secret: String,
    },
    Ernie {
        client_id: String,
        secret: String,
    },
    OpenAi {
        api_key: String,
        model: String,
        base_url: Option<String>,
    },
    Ollama {
        host: String,
        model: String,
    },
    Mock(MockSection),
}

impl Backend {
    /// Backend name as used in config keys
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Azure { .. } => "azure",
            Backend::Ernie { .. } => "ernie",
            Backend::OpenAi { .. } => "openai",
            Backend::Ollama { .. } => "ollama",
            Backend::Mock(_) => "mock",
        }
    }
}

/// `Ok(value)` when non-blank, otherwise `ConfigurationInvalid(field)`
pub(crate) fn required(value: &str, field: &str) -> Result<String> {
    if value.trim().is_empty() {
        return Err(PlayError::ConfigurationInvalid {
            field: field.to_string(),
        });
    }
    Ok(value.to_string())
}

impl PlayConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| PlayError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml(&content)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Merge with environment variables
    ///
    /// Only fills sections that are present in the config; the environment
    /// never switches a backend on.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// [`with_env`](Self::with_env) with an injectable lookup
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(azure) = self.azure.as_mut() {
            if let Some(v) = get("AZURE_OPENAI_API_KEY") {
                azure.secret = v;
            }
            if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
                azure.endpoint = v;
            }
            if let Some(v) = get("AZURE_OPENAI_DEPLOYMENT") {
                azure.deployment = v;
            }
        }

        if let Some(ernie) = self.ernie.as_mut() {
            if let Some(v) = get("ERNIE_CLIENT_ID") {
                ernie.client_id = v;
            }
            if let Some(v) = get("ERNIE_CLIENT_SECRET") {
                ernie.secret = v;
            }
        }

        if let Some(openai) = self.openai.as_mut() {
            if let Some(v) = get("OPENAI_API_KEY") {
                openai.api_key = v;
            }
        }

        if let Some(ollama) = self.ollama.as_mut() {
            if let Some(v) = get("OLLAMA_HOST") {
                ollama.host = v;
            }
        }

        self
    }

    /// Names of the sections switched on, in declaration order
    pub fn enabled_backends(&self) -> Vec<&'static str> {
        let mut enabled = Vec::new();
        if self.azure.as_ref().is_some_and(|s| s.enabled) {
            enabled.push("azure");
        }
        if self.ernie.as_ref().is_some_and(|s| s.enabled) {
            enabled.push("ernie");
        }
        if self.openai.as_ref().is_some_and(|s| s.enabled) {
            enabled.push("openai");
        }
        if self.ollama.as_ref().is_some_and(|s| s.enabled) {
            enabled.push("ollama");
        }
        if self.mock.as_ref().is_some_and(|s| s.enabled) {
            enabled.push("mock");
        }
        enabled
    }

    /// Validate the enabled section into a [`Backend`]
    ///
    /// Required fields are checked in declaration order; the first blank
    /// one is reported.
    pub fn backend(&self) -> Result<Backend> {
        let enabled = self.enabled_backends();
        match enabled.as_slice() {
            [] => return Err(PlayError::NoBackendConfigured),
            [_] => {}
            many => {
                return Err(PlayError::ConflictingBackends {
                    backends: many.join(", "),
                })
            }
        }

        if let Some(s) = self.azure.as_ref().filter(|s| s.enabled) {
            return Ok(Backend::Azure {
                deployment: required(&s.deployment, "azure.deployment")?,
                endpoint: required(&s.endpoint, "azure.endpoint")?,
                secret: required(&s.secret, "azure.secret")?,
            });
        }
        if let Some(s) = self.ernie.as_ref().filter(|s| s.enabled) {
            return Ok(Backend::Ernie {
                client_id: required(&s.client_id, "ernie.client_id")?,
                secret: required(&s.secret, "ernie.secret")?,
            });
        }
        if let Some(s) = self.openai.as_ref().filter(|s| s.enabled) {
            return Ok(Backend::OpenAi {
                api_key: required(&s.api_key, "openai.api_key")?,
                model: required(&s.model, "openai.model")?,
                base_url: s.base_url.clone().filter(|u| !u.trim().is_empty()),
            });
        }
        if let Some(s) = self.ollama.as_ref().filter(|s| s.enabled) {
            return Ok(Backend::Ollama {
                host: required(&s.host, "ollama.host")?,
                model: required(&s.model, "ollama.model")?,
            });
        }
        match self.mock.as_ref().filter(|s| s.enabled) {
            Some(s) => Ok(Backend::Mock(s.clone())),
            None => Err(PlayError::NoBackendConfigured),
        }
    }
}

// ============================================================================
// TEMPLATE CONFIG (config.json next to the template)
// ============================================================================

/// Name of the per-template parameter file
pub const TEMPLATE_CONFIG_FILE: &str = "config.json";

/// Per-template parameters stored beside the template file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<GenerationParams>,
}

impl TemplateConfig {
    /// Path of the `config.json` paired with `template_path`
    pub fn path_beside(template_path: impl AsRef<Path>) -> PathBuf {
        template_path
            .as_ref()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(TEMPLATE_CONFIG_FILE)
    }

    /// Read the paired `config.json`, if there is one
    pub fn load_beside(template_path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = Self::path_beside(template_path);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Overlay the completion block onto `params`
    pub fn apply_to(&self, params: &mut GenerationParams) {
        let Some(c) = &self.completion else {
            return;
        };
        params.temperature = c.temperature.or(params.temperature);
        params.max_tokens = c.max_tokens.or(params.max_tokens);
        params.top_p = c.top_p.or(params.top_p);
        params.presence_penalty = c.presence_penalty.or(params.presence_penalty);
        params.frequency_penalty = c.frequency_penalty.or(params.frequency_penalty);
        if !c.stop_sequences.is_empty() {
            params.stop_sequences = c.stop_sequences.clone();
        }
    }
}
