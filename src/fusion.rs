//! Signal fusion into a single verdict.
//!
//! Combines the rule, semantic, and classifier scores with fixed weights
//! and maps the fused score onto a three-way label. REVIEW is fail-closed
//! for delivery: it is rendered to the requester as a restriction, not
//! merely logged, even though it also queues for human review.

use crate::normalize::NormalizedPrompt;
use crate::rules::RuleSignal;
use crate::semantic::SemanticSignal;
use serde::Serialize;
use std::fmt;

pub const RULE_WEIGHT: f32 = 0.25;
pub const SEMANTIC_WEIGHT: f32 = 0.35;
pub const CLASSIFIER_WEIGHT: f32 = 0.40;

/// Fused score at or above this blocks the prompt.
pub const BLOCK_THRESHOLD: f32 = 0.45;
/// Fused score below this allows the prompt.
pub const ALLOW_THRESHOLD: f32 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Allow,
    Review,
    Block,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Allow => "ALLOW",
            Label::Review => "REVIEW",
            Label::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure threshold mapping; boundary ties resolve to the more severe label.
pub fn label_for(score: f32) -> Label {
    if score >= BLOCK_THRESHOLD {
        Label::Block
    } else if score < ALLOW_THRESHOLD {
        Label::Allow
    } else {
        Label::Review
    }
}

/// Full analysis outcome for one prompt. Computed fresh per request and
/// never persisted by the core.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub risk_score: f32,
    pub label: Label,
    pub rule: RuleSignal,
    pub semantic: SemanticSignal,
    pub classifier_score: f32,
    pub normalization: NormalizedPrompt,
    /// Advisory explanations; never feed back into scoring.
    pub reasons: Vec<String>,
    /// True when an external signal was unavailable during analysis. A
    /// degraded verdict is never ALLOW.
    pub degraded: bool,
}

/// Weighted fusion of the three signals, clamped to [0,1].
///
/// `unavailable` names external signals that failed during analysis; their
/// contribution is zero, but rather than understate risk the label is
/// floored at REVIEW.
pub fn fuse(
    rule: RuleSignal,
    semantic: SemanticSignal,
    classifier_score: f32,
    normalization: NormalizedPrompt,
    unavailable: &[&str],
) -> Verdict {
    let risk_score = (RULE_WEIGHT * rule.score
        + SEMANTIC_WEIGHT * semantic.score
        + CLASSIFIER_WEIGHT * classifier_score)
        .clamp(0.0, 1.0);

    let degraded = !unavailable.is_empty();
    let mut label = label_for(risk_score);
    if degraded && label == Label::Allow {
        label = Label::Review;
    }

    let mut reasons = Vec::new();
    if !rule.matched.is_empty() {
        let shown: Vec<&str> = rule.matched.iter().take(2).map(String::as_str).collect();
        reasons.push(format!("Matched rule patterns: {}", shown.join(", ")));
    }
    if semantic.score > 0.5 && semantic.matched_fingerprint.is_some() {
        reasons.push(format!(
            "Semantically similar to known attack ({:.0}% match)",
            semantic.score * 100.0
        ));
    }
    if classifier_score > 0.5 {
        reasons.push(format!(
            "Classifier flagged as attack ({:.0}% confidence)",
            classifier_score * 100.0
        ));
    }
    if normalization.was_modified {
        let applied: Vec<&str> = normalization
            .transformations
            .iter()
            .map(|t| t.describe())
            .collect();
        reasons.push(format!("Obfuscation detected: {}", applied.join(", ")));
    }
    for signal in unavailable {
        reasons.push(format!("{} signal unavailable; failing closed", signal));
    }

    Verdict {
        risk_score,
        label,
        rule,
        semantic,
        classifier_score,
        normalization,
        reasons,
        degraded,
    }
}
