//! Secret redaction.

use std::sync::RwLock;

use regex::Regex;

use super::{Result, SecretMasker};

/// Replacement text for redacted secrets.
pub const MASK: &str = "***";

/// Masks registered literal values and regex matches.
#[derive(Default)]
pub struct RegexSecretMasker {
    values: RwLock<Vec<String>>,
    patterns: RwLock<Vec<Regex>>,
}

impl RegexSecretMasker {
    /// Create a masker with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretMasker for RegexSecretMasker {
    fn add_value(&self, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        if values.iter().any(|v| v == value) {
            return;
        }
        values.push(value.to_string());
        // Longest first so a secret containing another is masked whole.
        values.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    fn add_regex(&self, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)?;
        self.patterns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(regex);
        Ok(())
    }

    fn mask_secrets(&self, input: &str) -> String {
        let mut output = input.to_string();

        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        for value in values.iter() {
            if output.contains(value.as_str()) {
                output = output.replace(value.as_str(), MASK);
            }
        }

        let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        for pattern in patterns.iter() {
            output = pattern.replace_all(&output, MASK).into_owned();
        }

        output
    }
}
