//! Rule-based scoring over normalized text.
//!
//! Rules are supplied externally as a JSON array of `{name, pattern, risk}`
//! objects and loaded once at startup; a file that fails to read, parse, or
//! compile is a fatal configuration error.

use crate::error::GuardError;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::path::Path;

/// One externally supplied detection rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub pattern: String,
    /// Risk weight contributed when the pattern matches.
    pub risk: f32,
}

struct CompiledRule {
    name: String,
    regex: Regex,
    risk: f32,
}

/// Outcome of matching all rules against one prompt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleSignal {
    pub score: f32,
    /// Names of matched rules, in rule evaluation order.
    pub matched: Vec<String>,
    pub explanation: String,
}

impl RuleSignal {
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            matched: Vec::new(),
            explanation: "No patterns matched".to_string(),
        }
    }
}

/// Case-insensitive regex scorer over the externally supplied rule set.
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
}

impl RuleMatcher {
    /// Load and compile a rule set from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, GuardError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| GuardError::RuleLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Parse and compile a rule set from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, GuardError> {
        let definitions: Vec<RuleDefinition> =
            serde_json::from_str(json).map_err(|e| GuardError::RuleLoad(e.to_string()))?;
        Self::from_rules(definitions)
    }

    /// Compile an already-parsed rule set, preserving order.
    pub fn from_rules(definitions: Vec<RuleDefinition>) -> Result<Self, GuardError> {
        let mut rules = Vec::with_capacity(definitions.len());
        for def in definitions {
            let regex = RegexBuilder::new(&def.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| GuardError::RulePattern {
                    name: def.name.clone(),
                    source,
                })?;
            rules.push(CompiledRule {
                name: def.name,
                regex,
                risk: def.risk,
            });
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Search every rule against the lowercased text, independent of match
    /// position. The score rewards corroboration across distinct rules
    /// without letting a single high-weight rule alone exceed 1.
    pub fn score(&self, text: &str) -> RuleSignal {
        let lowered = text.to_lowercase();
        let mut matched = Vec::new();
        let mut total_risk = 0.0f32;

        for rule in &self.rules {
            if rule.regex.is_match(&lowered) {
                matched.push(rule.name.clone());
                total_risk += rule.risk;
            }
        }

        if matched.is_empty() {
            return RuleSignal::empty();
        }

        let boost = 1.0 + 0.15 * (matched.len() - 1) as f32;
        let score = (total_risk * boost).min(1.0);
        let explanation = format!("{} rule(s) matched: {}", matched.len(), matched.join(", "));

        RuleSignal {
            score,
            matched,
            explanation,
        }
    }
}
