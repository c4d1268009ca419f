//! Job variables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Enables debug output on every node of the job.
pub const SYSTEM_DEBUG: &str = "System.Debug";
/// Proxy URL injected at job initialization.
pub const AGENT_PROXY_URL: &str = "Agent.ProxyUrl";
/// Proxy username injected at job initialization.
pub const AGENT_PROXY_USERNAME: &str = "Agent.ProxyUsername";
/// Proxy password injected at job initialization (secret).
pub const AGENT_PROXY_PASSWORD: &str = "Agent.ProxyPassword";

/// A single variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Name as first supplied
    pub name: String,

    /// Expanded value
    pub value: String,

    /// Whether the value must be redacted from output
    pub secret: bool,
}

/// The variable set of a job.
///
/// Names are case-insensitive. The root node builds the set during job
/// initialization; afterwards it is shared read-only down the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variables {
    entries: HashMap<String, Variable>,
}

impl Variables {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, secret: bool) {
        let name = name.into();
        self.entries.insert(
            name.to_lowercase(),
            Variable {
                name,
                value: value.into(),
                secret,
            },
        );
    }

    /// Mark an existing variable secret. Returns false if it does not exist.
    pub fn mark_secret(&mut self, name: &str) -> bool {
        match self.entries.get_mut(&name.to_lowercase()) {
            Some(variable) => {
                variable.secret = true;
                true
            }
            None => false,
        }
    }

    /// Get a value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_lowercase())
            .map(|v| v.value.as_str())
    }

    /// Get a value parsed as a boolean (`true`/`false`, any case).
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)
            .and_then(|v| v.trim().to_lowercase().parse::<bool>().ok())
    }

    /// Whether the variable exists and is secret.
    pub fn is_secret(&self, name: &str) -> bool {
        self.entries
            .get(&name.to_lowercase())
            .map(|v| v.secret)
            .unwrap_or(false)
    }

    /// Values of all secret variables.
    pub fn secret_values(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .filter(|v| v.secret)
            .map(|v| v.value.as_str())
    }

    /// Iterate over all variables.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.entries.values()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
