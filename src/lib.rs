//! Hybrid prompt-attack detection for LLM traffic.
//!
//! Inspects text prompts destined for a language model and decides whether
//! to allow, flag, or block them:
//! - Obfuscation-aware normalization (homoglyphs, URL escapes, Base64,
//!   token smuggling)
//! - Rule-based pattern scoring over an externally supplied rule set
//! - Semantic similarity against a live-updatable attack-fingerprint index
//! - Statistical classifier scoring behind a pluggable trait
//! - Signal fusion into an ALLOW / REVIEW / BLOCK verdict
//! - A self-learning loop: candidate review, probing detection, variant
//!   expansion, and durable persistence of approved attacks
//!
//! This is a best-effort layered heuristic system, not a formally verified
//! filter.

pub mod classifier;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod learner;
pub mod normalize;
pub mod rules;
pub mod semantic;
pub mod storage;

pub use classifier::{Classifier, FeedbackStore, LexiconClassifier, RetrainReport};
pub use embedding::{Embedder, HashedNgramEmbedder};
pub use error::GuardError;
pub use fusion::{fuse, label_for, Label, Verdict};
pub use learner::{novelty_score, Approval, AttackLearner, Candidate, LearnedRecord};
pub use normalize::{NormalizedPrompt, Normalizer, Transformation};
pub use rules::{RuleDefinition, RuleMatcher, RuleSignal};
pub use semantic::{SemanticSignal, SemanticStore};
pub use storage::{AttackStore, FileStore, MemoryStore};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cap on each external signal call (embedding, classifier).
pub const DEFAULT_SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

/// The hybrid detection pipeline: normalization, the three scorers, and
/// fusion. Shared across sessions; per-session learning state lives in
/// [`AttackLearner`].
pub struct Guardian {
    normalizer: Normalizer,
    rules: RuleMatcher,
    store: Arc<SemanticStore>,
    classifier: Arc<dyn Classifier>,
    signal_timeout: Duration,
}

impl Guardian {
    pub fn new(
        rules: RuleMatcher,
        store: Arc<SemanticStore>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(),
            rules,
            store,
            classifier,
            signal_timeout: DEFAULT_SIGNAL_TIMEOUT,
        }
    }

    /// Override the external-signal timeout. A call that exceeds it counts
    /// as that signal being unavailable.
    pub fn with_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    /// Shared fingerprint index, for wiring up learners.
    pub fn store(&self) -> Arc<SemanticStore> {
        self.store.clone()
    }

    pub async fn collection_size(&self) -> usize {
        self.store.len().await
    }

    /// Analyze one prompt. Never fails: if the embedding function or the
    /// classifier is unavailable, that signal contributes zero, the verdict
    /// is marked degraded, and the label is floored at REVIEW rather than
    /// silently understating risk.
    pub async fn analyze(&self, prompt: &str) -> Verdict {
        let normalization = self.normalizer.normalize(prompt);
        let rule = self.rules.score(&normalization.cleaned);

        let mut unavailable: Vec<&str> = Vec::new();

        let semantic = match tokio::time::timeout(
            self.signal_timeout,
            self.store.query(&normalization.cleaned),
        )
        .await
        {
            Ok(Ok(signal)) => signal,
            Ok(Err(e)) => {
                warn!(error = %e, "semantic signal unavailable");
                unavailable.push("semantic");
                SemanticSignal::empty()
            }
            Err(_) => {
                warn!(timeout = ?self.signal_timeout, "semantic query timed out");
                unavailable.push("semantic");
                SemanticSignal::empty()
            }
        };

        let classifier_score = match tokio::time::timeout(
            self.signal_timeout,
            self.classifier.predict(&normalization.cleaned),
        )
        .await
        {
            Ok(Ok(score)) => score.clamp(0.0, 1.0),
            Ok(Err(e)) => {
                warn!(error = %e, "classifier signal unavailable");
                unavailable.push("classifier");
                0.0
            }
            Err(_) => {
                warn!(timeout = ?self.signal_timeout, "classifier predict timed out");
                unavailable.push("classifier");
                0.0
            }
        };

        let verdict = fuse(rule, semantic, classifier_score, normalization, &unavailable);

        match verdict.label {
            Label::Block => info!(
                risk = verdict.risk_score,
                rules = verdict.rule.matched.len(),
                "prompt blocked"
            ),
            _ => debug!(
                risk = verdict.risk_score,
                label = %verdict.label,
                "prompt analyzed"
            ),
        }
        verdict
    }
}
