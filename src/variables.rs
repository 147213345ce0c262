//! Variable resolution
//!
//! The resolver hands every extracted name to a [`VariableCollector`] in one
//! batch and waits for a single answer: either the filled-in variables or an
//! abandonment. It never proceeds with a partially bound set.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{PlayError, Result};
use crate::session::CancelHandle;

/// Pre-compiled regex for a bare variable name
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// A variable referenced by a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name without the sigil
    pub name: String,
    /// `None` means unset; `Some("")` is a valid value
    pub value: Option<String>,
}

impl Variable {
    /// Create an unset variable
    pub fn unset(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Create a variable with a value
    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

/// Complete name → value mapping for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    values: HashMap<String, String>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Answer from a collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    /// The operator confirmed; variables carry whatever was entered
    Submitted(Vec<Variable>),
    /// The operator backed out
    Abandoned,
}

/// Source of variable values (a dialog, a terminal prompt, a fixture...)
#[async_trait]
pub trait VariableCollector: Send + Sync {
    /// Present all variables at once and wait for the operator's answer
    async fn collect(&self, variables: Vec<Variable>) -> Collected;
}

/// Resolve `names` into a complete [`BindingSet`]
///
/// - empty `names`: returns an empty set without calling the collector
/// - [`Collected::Abandoned`]: [`PlayError::VariablesAbandoned`]
/// - any requested name left unset or missing: [`PlayError::VariablesIncomplete`]
pub async fn resolve(names: &[String], collector: &dyn VariableCollector) -> Result<BindingSet> {
    if names.is_empty() {
        return Ok(BindingSet::new());
    }

    debug!(count = names.len(), "Collecting variable values");
    let request = names.iter().map(Variable::unset).collect();

    let submitted = match collector.collect(request).await {
        Collected::Submitted(variables) => variables,
        Collected::Abandoned => return Err(PlayError::VariablesAbandoned),
    };

    let mut answers: HashMap<String, String> = submitted
        .into_iter()
        .filter_map(|v| v.value.map(|value| (v.name, value)))
        .collect();

    let mut values = HashMap::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match answers.remove(name) {
            Some(value) => {
                values.insert(name.clone(), value);
            }
            None => missing.push(name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(PlayError::VariablesIncomplete { names: missing });
    }

    Ok(BindingSet { values })
}

/// Collector answering from a fixed map
///
/// Names absent from the map are returned unset, so the resolver reports them.
#[derive(Debug, Clone, Default)]
pub struct StaticCollector {
    values: HashMap<String, String>,
}

impl StaticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value (builder)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Parse `name=value` assignments (value may be empty or contain `=`; the `=` is required)
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self> {
        let mut values = HashMap::new();
        for raw in assignments {
            let raw = raw.as_ref();
            let Some((name, value)) = raw.split_once('=') else {
                return Err(PlayError::InvalidAssignment {
                    raw: raw.to_string(),
                });
            };
            let name = name.trim().trim_start_matches(crate::template::SIGIL);
            if !NAME_RE.is_match(name) {
                return Err(PlayError::InvalidVariableName {
                    name: name.to_string(),
                });
            }
            values.insert(name.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    /// Value for a name, if supplied
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

#[async_trait]
impl VariableCollector for StaticCollector {
    async fn collect(&self, variables: Vec<Variable>) -> Collected {
        Collected::Submitted(
            variables
                .into_iter()
                .map(|v| Variable {
                    value: self.values.get(&v.name).cloned(),
                    name: v.name,
                })
                .collect(),
        )
    }
}

/// Collector that always backs out
#[derive(Debug, Clone, Copy, Default)]
pub struct AbandoningCollector;

#[async_trait]
impl VariableCollector for AbandoningCollector {
    async fn collect(&self, _variables: Vec<Variable>) -> Collected {
        Collected::Abandoned
    }
}

/// Collector reading one line per value from an async reader
///
/// Names covered by the preset are not asked for. End of input, a read
/// error, or the cancel handle firing mid-entry all abandon.
pub struct LineCollector<R> {
    lines: Mutex<Lines<R>>,
    preset: StaticCollector,
    cancel: Option<CancelHandle>,
    prompt: Option<fn(&str)>,
}

impl<R> LineCollector<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
            preset: StaticCollector::new(),
            cancel: None,
            prompt: None,
        }
    }

    /// Values that are never asked for
    pub fn with_preset(mut self, preset: StaticCollector) -> Self {
        self.preset = preset;
        self
    }

    /// Stop waiting for input once `handle` fires
    pub fn abandon_on(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }

    /// Called with the variable name before each read
    pub fn with_prompt(mut self, prompt: fn(&str)) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

#[async_trait]
impl<R> VariableCollector for LineCollector<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn collect(&self, variables: Vec<Variable>) -> Collected {
        let mut lines = self.lines.lock().await;
        let mut filled = Vec::with_capacity(variables.len());

        for variable in variables {
            if let Some(value) = self.preset.get(&variable.name) {
                filled.push(Variable::with_value(variable.name, value));
                continue;
            }

            if let Some(prompt) = self.prompt {
                prompt(&variable.name);
            }
            let line = match &self.cancel {
                Some(handle) => tokio::select! {
                    biased;
                    _ = handle.cancelled() => return Collected::Abandoned,
                    line = lines.next_line() => line,
                },
                None => lines.next_line().await,
            };
            match line {
                Ok(Some(line)) => filled.push(Variable::with_value(variable.name, line)),
                _ => return Collected::Abandoned,
            }
        }
        Collected::Submitted(filled)
    }
}
