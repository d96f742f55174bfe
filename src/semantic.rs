//! Append-only semantic similarity index of known attack fingerprints.
//!
//! Backed by a flat linear scan: intentionally simple, and it trivially
//! supports live mutation — fingerprints added by the learning loop become
//! queryable without any rebuild or restart. Query cost is linear in corpus
//! size, which is acceptable for corpora in the thousands of fingerprints;
//! that is the scaling ceiling of this index. A larger deployment should
//! wrap the same add/query contract around an ANN index instead.

use crate::embedding::{dot, Embedder};
use crate::error::GuardError;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A known attack phrase plus its embedding. Append-only: never deleted or
/// mutated; identity is the literal text.
#[derive(Debug, Clone)]
pub struct AttackFingerprint {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Best similarity found for one prompt.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticSignal {
    pub score: f32,
    /// Stored fingerprint that produced the maximum.
    pub matched_fingerprint: Option<String>,
    /// Prompt fragment that produced the maximum.
    pub matched_subphrase: Option<String>,
}

impl SemanticSignal {
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            matched_fingerprint: None,
            matched_subphrase: None,
        }
    }
}

/// Live-updatable nearest-neighbor index over attack fingerprints.
///
/// Mutation is serialized through a write lock; queries share read locks
/// and may run concurrently against a stable snapshot.
pub struct SemanticStore {
    embedder: Arc<dyn Embedder>,
    fingerprints: RwLock<Vec<AttackFingerprint>>,
}

impl SemanticStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            fingerprints: RwLock::new(Vec::new()),
        }
    }

    /// Embed and append every phrase not already present (exact-text dedup).
    /// New fingerprints are immediately visible to queries. Returns the
    /// number actually appended.
    pub async fn add(&self, phrases: &[String]) -> Result<usize, GuardError> {
        let fresh: Vec<String> = {
            let store = self.fingerprints.read().await;
            let existing: HashSet<&str> = store.iter().map(|f| f.text.as_str()).collect();
            let mut seen = HashSet::new();
            phrases
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty() && !existing.contains(*p))
                .filter(|p| seen.insert(p.to_string()))
                .map(String::from)
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        // Embed outside any lock; the embedding call may block on inference.
        let vectors = self.embedder.embed_batch(&fresh).await?;

        let mut store = self.fingerprints.write().await;
        let mut added = 0;
        for (text, embedding) in fresh.into_iter().zip(vectors) {
            // Re-check under the write lock: a concurrent add may have won.
            if store.iter().any(|f| f.text == text) {
                continue;
            }
            store.push(AttackFingerprint { text, embedding });
            added += 1;
        }
        debug!(added, total = store.len(), "attack fingerprints added");
        Ok(added)
    }

    /// Maximum similarity between any fragment of `text` and any stored
    /// fingerprint. Fragments are sentence-level splits (`. ! ? ; ,`),
    /// trimmed, longer than 5 characters, at most the first 5; if none
    /// qualify the whole text is the single fragment.
    pub async fn query(&self, text: &str) -> Result<SemanticSignal, GuardError> {
        let mut fragments: Vec<String> = text
            .split(['.', '!', '?', ';', ','])
            .map(str::trim)
            .filter(|f| f.chars().count() > 5)
            .take(5)
            .map(String::from)
            .collect();
        if fragments.is_empty() {
            fragments.push(text.to_string());
        }

        if self.fingerprints.read().await.is_empty() {
            return Ok(SemanticSignal::empty());
        }

        let vectors = self.embedder.embed_batch(&fragments).await?;

        let store = self.fingerprints.read().await;
        let mut best = SemanticSignal::empty();
        for (fragment, vector) in fragments.iter().zip(&vectors) {
            for fingerprint in store.iter() {
                let similarity = dot(vector, &fingerprint.embedding).max(0.0);
                if similarity > best.score {
                    best = SemanticSignal {
                        score: similarity,
                        matched_fingerprint: Some(fingerprint.text.clone()),
                        matched_subphrase: Some(fragment.clone()),
                    };
                }
            }
        }
        Ok(best)
    }

    /// Number of stored fingerprints.
    pub async fn len(&self) -> usize {
        self.fingerprints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fingerprints.read().await.is_empty()
    }

    /// Add every non-blank, non-`#` line of a plain-text corpus.
    pub async fn load_corpus(&self, text: &str) -> Result<usize, GuardError> {
        let phrases = crate::storage::parse_phrase_lines(text);
        self.add(&phrases).await
    }
}
