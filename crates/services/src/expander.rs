//! `$(name)` macro expansion between job variables.

use std::collections::HashMap;

use worker_core::Variables;

use super::{Expansion, VariableExpander};

/// Nesting limit for macro references.
pub const MAX_EXPANSION_DEPTH: usize = 50;

/// Expands `$(name)` references to other variables of the same bag.
///
/// References to unknown variables are left as written. Cyclic or
/// over-deep references are left unexpanded and reported as warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MacroExpander;

impl MacroExpander {
    /// Create an expander.
    pub fn new() -> Self {
        Self
    }
}

impl VariableExpander for MacroExpander {
    fn expand(&self, raw: &HashMap<String, String>) -> Expansion {
        let index: HashMap<String, &str> = raw
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.as_str()))
            .collect();

        let mut names: Vec<&String> = raw.keys().collect();
        names.sort();

        let mut variables = Variables::new();
        let mut expander = Expanding {
            index: &index,
            resolved: HashMap::new(),
            warnings: Vec::new(),
        };
        for name in names {
            let key = name.to_lowercase();
            let value = match expander.resolved.get(&key) {
                Some(value) => value.clone(),
                None => {
                    let mut visiting = vec![key.clone()];
                    let (value, clean) = expander.expand_value(&raw[name], &mut visiting, name);
                    if clean {
                        expander.resolved.insert(key, value.clone());
                    }
                    value
                }
            };
            variables.set(name.clone(), value, false);
        }
        let warnings = expander.warnings;

        Expansion {
            variables,
            warnings,
        }
    }
}

/// State of one expansion pass.
///
/// `resolved` holds the fully expanded value of every variable whose
/// expansion hit no cycle or depth limit, keyed by lowercase name.
struct Expanding<'a> {
    index: &'a HashMap<String, &'a str>,
    resolved: HashMap<String, String>,
    warnings: Vec<String>,
}

impl Expanding<'_> {
    /// Expand `value`, returning the result and whether it is free of
    /// unexpanded cyclic or over-deep references.
    fn expand_value(
        &mut self,
        value: &str,
        visiting: &mut Vec<String>,
        root: &str,
    ) -> (String, bool) {
        let mut output = String::with_capacity(value.len());
        let mut clean = true;
        let mut rest = value;

        while let Some(start) = rest.find("$(") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find(')') else {
                output.push_str(&rest[start..]);
                return (output, clean);
            };

            let reference = &after[..end];
            let token = &rest[start..start + end + 3];
            let key = reference.trim().to_lowercase();

            if let Some(resolved) = self.resolved.get(&key) {
                output.push_str(resolved);
                rest = &after[end + 1..];
                continue;
            }

            match self.index.get(&key).copied() {
                Some(_) if visiting.contains(&key) => {
                    self.warn(format!(
                        "Variable '{}' contains a cyclical reference to '{}'.",
                        root, reference
                    ));
                    output.push_str(token);
                    clean = false;
                }
                Some(_) if visiting.len() >= MAX_EXPANSION_DEPTH => {
                    self.warn(format!(
                        "Variable '{}' exceeds the maximum expansion depth of {}.",
                        root, MAX_EXPANSION_DEPTH
                    ));
                    output.push_str(token);
                    clean = false;
                }
                Some(target) => {
                    visiting.push(key.clone());
                    let (expanded, target_clean) = self.expand_value(target, visiting, root);
                    visiting.pop();
                    if target_clean {
                        self.resolved.insert(key, expanded.clone());
                    } else {
                        clean = false;
                    }
                    output.push_str(&expanded);
                }
                None => output.push_str(token),
            }

            rest = &after[end + 1..];
        }

        output.push_str(rest);
        (output, clean)
    }

    fn warn(&mut self, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }
}
