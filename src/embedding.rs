//! Embedding seam for the semantic store.
//!
//! The store only requires fixed-dimension, L2-normalized vectors; where
//! they come from is an injection point. Production deployments plug a
//! pretrained sentence-embedding model in behind [`Embedder`]; the built-in
//! [`HashedNgramEmbedder`] is a cheap, deterministic local default that
//! needs no model download and doubles as the test embedding.

use crate::error::GuardError;
use async_trait::async_trait;

/// External embedding function: text in, L2-normalized vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of produced vectors.
    fn dim(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GuardError>;

    /// Batch variant; the default loops over [`Embedder::embed`].
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GuardError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Dot product of two equal-length vectors. For L2-normalized inputs this
/// is cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Character-trigram hashing embedder. Case-folded trigrams are hashed into
/// a fixed number of buckets and the bucket counts L2-normalized, so texts
/// sharing surface vocabulary land close together. Never fails.
pub struct HashedNgramEmbedder {
    dim: usize,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashedNgramEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "embedding dimension must be non-zero");
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.len() < 3 {
            if !chars.is_empty() {
                let gram: String = chars.iter().collect();
                vector[(fnv1a(gram.as_bytes()) % self.dim as u64) as usize] += 1.0;
            }
        } else {
            for window in chars.windows(3) {
                let gram: String = window.iter().collect();
                vector[(fnv1a(gram.as_bytes()) % self.dim as u64) as usize] += 1.0;
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashedNgramEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GuardError> {
        Ok(self.embed_sync(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
