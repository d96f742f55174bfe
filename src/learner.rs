//! Self-learning engine: candidate review, probing detection, and variant
//! expansion.
//!
//! One [`AttackLearner`] is a per-session state object owned by the caller.
//! It holds the pending review queue, the learned ledger, and the probe
//! counter; approvals expand into variants and commit to the shared
//! semantic store plus durable storage. The probe counter lives in-process,
//! which is only correct for a single-worker deployment.

use crate::error::GuardError;
use crate::fusion::Label;
use crate::semantic::SemanticStore;
use crate::storage::{parse_phrase_lines, AttackStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Qualifying verdicts in one session before the probing flag raises.
pub const PROBE_THRESHOLD: u32 = 3;

/// Default cap on generated variants per approval.
pub const DEFAULT_MAX_VARIANTS: usize = 12;

/// Word -> substitutes for single-word variant generation.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("ignore", &["forget", "disregard", "overlook", "skip", "bypass", "dismiss"]),
    ("previous", &["prior", "former", "earlier", "old", "past"]),
    ("instructions", &["rules", "guidelines", "constraints", "directives", "protocols", "restrictions"]),
    ("forget", &["ignore", "disregard", "abandon", "drop", "erase"]),
    ("rules", &["instructions", "guidelines", "restrictions", "constraints", "policies"]),
    ("bypass", &["ignore", "circumvent", "override", "skip", "break"]),
    ("safety", &["security", "ethical", "content", "behavioral"]),
    ("filters", &["restrictions", "guidelines", "safeguards", "protocols", "policies"]),
    ("pretend", &["act as", "behave as", "simulate being", "roleplay as", "imagine you are"]),
    ("unrestricted", &["unlimited", "uncensored", "unfiltered", "free", "unbound", "unshackled"]),
    ("reveal", &["expose", "show", "disclose", "share", "tell me"]),
    ("hack", &["break into", "exploit", "attack", "compromise", "penetrate"]),
    ("jailbreak", &["escape your limits", "break free", "remove your constraints", "unlock yourself"]),
    ("override", &["overwrite", "replace", "supersede", "cancel", "nullify"]),
    ("system", &["core", "internal", "base", "original"]),
    ("prompt", &["instructions", "directives", "programming", "training"]),
];

/// Structural wrappers; the empty entries let a prefix or suffix appear alone.
const PREFIXES: &[&str] = &[
    "",
    "From now on, ",
    "Starting now, ",
    "For this conversation, ",
    "In developer mode, ",
    "As a test, ",
    "Hypothetically, ",
    "For research purposes, ",
    "In fiction, ",
];

const SUFFIXES: &[&str] = &[
    "",
    " Do this now.",
    " Comply immediately.",
    " This is important.",
    " You must obey.",
    " Acknowledge and proceed.",
    " No restrictions apply.",
];

/// A blocked or flagged prompt awaiting human review.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub prompt: String,
    pub risk_score: f32,
    pub novelty_score: f32,
    pub timestamp: String,
}

/// Ledger entry for an approved or bulk-imported phrase.
#[derive(Debug, Clone, Serialize)]
pub struct LearnedRecord {
    pub prompt: String,
    pub variants_added: usize,
    pub timestamp: String,
}

/// Result of approving a candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub prompt: String,
    pub variants_added: usize,
}

/// Novelty estimate from the best known-attack similarity: above 0.5 is a
/// plausibly new attack family, 0.2-0.5 a paraphrase of a known family,
/// below 0.2 near-duplication of existing coverage.
pub fn novelty_score(best_similarity: f32) -> f32 {
    (1.0 - best_similarity).max(0.0)
}

/// Per-session learning state. Mutating operations take `&mut self`; the
/// shared semantic store serializes its own writes.
pub struct AttackLearner {
    store: Arc<SemanticStore>,
    storage: Arc<dyn AttackStore>,
    candidates: Vec<Candidate>,
    learned: Vec<LearnedRecord>,
    probe_count: u32,
    max_variants: usize,
    rng: StdRng,
}

impl AttackLearner {
    pub fn new(store: Arc<SemanticStore>, storage: Arc<dyn AttackStore>) -> Self {
        Self {
            store,
            storage,
            candidates: Vec::new(),
            learned: Vec::new(),
            probe_count: 0,
            max_variants: DEFAULT_MAX_VARIANTS,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded constructor so tests can pin the compounding step.
    pub fn with_seed(store: Arc<SemanticStore>, storage: Arc<dyn AttackStore>, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(store, storage)
        }
    }

    pub fn with_max_variants(mut self, max_variants: usize) -> Self {
        self.max_variants = max_variants;
        self
    }

    /// Count a verdict toward the session probe counter. Only BLOCK and
    /// REVIEW qualify. Returns whether the probing flag is raised; the flag
    /// is sticky for the rest of the session.
    pub fn record_verdict(&mut self, label: Label) -> bool {
        if matches!(label, Label::Block | Label::Review) {
            self.probe_count += 1;
        }
        self.is_probing()
    }

    pub fn is_probing(&self) -> bool {
        self.probe_count >= PROBE_THRESHOLD
    }

    pub fn probe_count(&self) -> u32 {
        self.probe_count
    }

    /// Queue a blocked/flagged prompt for review. Exact-text dedup against
    /// both the pending queue and the learned ledger; duplicates are a
    /// silent no-op.
    pub fn enqueue(&mut self, prompt: &str, risk_score: f32, novelty: f32) {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return;
        }
        let already = self.candidates.iter().any(|c| c.prompt == prompt)
            || self.learned.iter().any(|l| l.prompt == prompt);
        if already {
            return;
        }
        debug!(prompt, risk_score, novelty, "candidate queued for review");
        self.candidates.push(Candidate {
            prompt: prompt.to_string(),
            risk_score,
            novelty_score: novelty,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn learned(&self) -> &[LearnedRecord] {
        &self.learned
    }

    /// Approve a candidate: expand into variants, commit the lot to the
    /// semantic store, and persist the original. Approving a phrase already
    /// in the learned ledger is a no-op.
    pub async fn approve(&mut self, prompt: &str) -> Result<Approval, GuardError> {
        let prompt = prompt.trim().to_string();
        if self.learned.iter().any(|l| l.prompt == prompt) {
            return Ok(Approval {
                prompt,
                variants_added: 0,
            });
        }
        self.candidates.retain(|c| c.prompt != prompt);

        let variants = self.generate_variants(&prompt);
        let mut batch = Vec::with_capacity(1 + variants.len());
        batch.push(prompt.clone());
        batch.extend(variants.iter().cloned());

        // Hot-add: queryable without a restart.
        self.store.add(&batch).await?;
        self.storage.append(&prompt)?;
        self.learned.push(LearnedRecord {
            prompt: prompt.clone(),
            variants_added: variants.len(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        info!(
            prompt = %prompt,
            variants = variants.len(),
            "candidate approved and committed"
        );
        Ok(Approval {
            prompt,
            variants_added: variants.len(),
        })
    }

    /// Discard a candidate. No persistence, no store mutation.
    pub fn reject(&mut self, prompt: &str) {
        let prompt = prompt.trim();
        self.candidates.retain(|c| c.prompt != prompt);
    }

    /// Trusted bulk load: every non-blank, non-comment line goes straight
    /// into the semantic store, bypassing the review queue. Lines not
    /// already in the ledger are persisted and recorded. Returns the number
    /// of newly recorded phrases.
    pub async fn bulk_import(&mut self, text: &str) -> Result<usize, GuardError> {
        let phrases = parse_phrase_lines(text);
        if phrases.is_empty() {
            return Ok(0);
        }
        self.store.add(&phrases).await?;

        // Mutable set so a phrase repeated within one import is still
        // recorded once.
        let mut known: HashSet<String> = self.learned.iter().map(|l| l.prompt.clone()).collect();
        let fresh: Vec<String> = phrases
            .into_iter()
            .filter(|p| known.insert(p.clone()))
            .collect();
        for phrase in &fresh {
            self.storage.append(phrase)?;
            self.learned.push(LearnedRecord {
                prompt: phrase.clone(),
                variants_added: 0,
                timestamp: chrono::Utc::now().to_rfc3339(),
            });
        }
        info!(imported = fresh.len(), "bulk import committed");
        Ok(fresh.len())
    }

    /// Full durable-file contents; an absent file yields an empty string.
    pub fn export_learned(&self) -> Result<String, GuardError> {
        Ok(self.storage.read_all()?)
    }

    pub async fn collection_size(&self) -> usize {
        self.store.len().await
    }

    /// Generate up to `max_variants` structurally diverse variants:
    /// single-word synonym substitutions, prefix/suffix wraps, then a
    /// randomized compounding pass that re-wraps some of the earlier
    /// variants. Steps 1-2 are deterministic; the compounding step draws
    /// from the injected RNG. The exact original is never included.
    fn generate_variants(&mut self, phrase: &str) -> Vec<String> {
        let mut variants: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut push = |variants: &mut Vec<String>, seen: &mut HashSet<String>, v: String| {
            if seen.insert(v.clone()) {
                variants.push(v);
            }
        };

        // 1. Single-word synonym substitutions, one word per variant.
        let words: Vec<&str> = phrase.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            let key = word.to_lowercase();
            let key = key.trim_end_matches(['.', ',', '!', '?', ';', ':']);
            let Some((_, synonyms)) = SYNONYMS.iter().find(|(w, _)| *w == key) else {
                continue;
            };
            for &synonym in *synonyms {
                let mut replaced = words.clone();
                replaced[i] = synonym;
                push(&mut variants, &mut seen, replaced.join(" "));
            }
        }

        // 2. Prefix/suffix wraps of the original.
        for prefix in PREFIXES {
            for suffix in SUFFIXES {
                if prefix.is_empty() && suffix.is_empty() {
                    continue;
                }
                push(
                    &mut variants,
                    &mut seen,
                    format!("{}{}{}", prefix, phrase, suffix).trim().to_string(),
                );
            }
        }

        // 3. Compounding: one further random prefix on up to 10 earlier
        // variants. Intentionally nondeterministic across calls.
        let bases: Vec<String> = variants.iter().take(10).cloned().collect();
        for base in bases {
            let prefix = PREFIXES
                .choose(&mut self.rng)
                .copied()
                .unwrap_or_default();
            if !prefix.is_empty() {
                push(
                    &mut variants,
                    &mut seen,
                    format!("{}{}", prefix, base).trim().to_string(),
                );
            }
        }

        variants.retain(|v| v != phrase);
        variants.truncate(self.max_variants);
        variants
    }
}
