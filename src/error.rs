//! Closed error taxonomy for the retrieval engine.
//!
//! Ambient I/O (persistence, HTTP) still flows through `anyhow::Result` /
//! `.context(...)` the way the base crate does; this enum exists only for
//! the kinds callers must match on and branch over.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("input text is empty")]
    EmptyInput,

    #[error("embedding vector is degenerate (near-zero magnitude)")]
    DegenerateVector,

    #[error("no LLM backend is available")]
    ModelUnavailable,

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("retrieval produced no survivable candidates")]
    RetrievalEmpty,

    #[error("operation was cancelled")]
    Cancelled,
}

impl EngineError {
    /// True when this error is safe to surface verbatim to an end user
    /// (free of stack internals, already an actionable message).
    pub fn user_message(&self) -> String {
        match self {
            EngineError::EmptyQuery => {
                "Could not understand your query. Try longer phrases.".to_string()
            }
            EngineError::DimensionMismatch { .. } => {
                "This query could not be matched against the current knowledge base.".to_string()
            }
            EngineError::EmptyInput => "No text was provided to embed.".to_string(),
            EngineError::DegenerateVector => {
                "Could not build a usable representation of this text.".to_string()
            }
            EngineError::ModelUnavailable => {
                "No language model is currently available to answer this question.".to_string()
            }
            EngineError::GenerationFailed(_) => {
                "The answer could not be generated. Please try again.".to_string()
            }
            EngineError::RetrievalEmpty => {
                "No relevant context was found for this question.".to_string()
            }
            EngineError::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_no_internals() {
        let e = EngineError::DimensionMismatch {
            expected: 512,
            got: 384,
        };
        assert!(!e.user_message().contains("512"));
    }
}
