//! Crate error types.

use thiserror::Error;

/// Errors surfaced by the detection pipeline and learning engine.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Rule-set file could not be read or parsed. Fatal at startup: the
    /// system must not serve requests in a partially configured state.
    #[error("failed to load rule set: {0}")]
    RuleLoad(String),

    /// A rule pattern did not compile.
    #[error("invalid rule pattern `{name}`: {source}")]
    RulePattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    /// The external embedding function failed or timed out.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The external classifier failed or timed out.
    #[error("classifier unavailable: {0}")]
    Classifier(String),

    /// Durable storage I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
