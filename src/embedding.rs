//! C1 — Embedding Provider.
//!
//! Deterministic, non-ML text → unit-vector embedder. The public contract
//! (`embed(text) -> Vec<f32>`) deliberately matches the base crate's
//! `EmbeddingModel::embed_query`/`embed_document` shape (see
//! `embeddings/mod.rs`), generalized so word-vector lookup plus L2
//! normalization replaces the ONNX/E5 model.

use crate::error::EngineError;
use crate::types::vector_norm;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic embedder: same text always yields the same vector, with no
/// model weights or I/O involved.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
    fn dimension(&self) -> usize;

    /// Batch embed, checking `should_cancel` every `N` items.
    fn embed_batch(
        &self,
        texts: &[&str],
        should_cancel: &dyn Fn() -> bool,
    ) -> Result<Vec<Vec<f32>>, EngineError> {
        const CANCEL_CHECK_EVERY: usize = 32;
        let mut out = Vec::with_capacity(texts.len());
        for (i, t) in texts.iter().enumerate() {
            if i % CANCEL_CHECK_EVERY == 0 && should_cancel() {
                return Err(EngineError::Cancelled);
            }
            out.push(self.embed(t)?);
        }
        Ok(out)
    }
}

/// The default deterministic provider: per-word pseudo-random vectors
/// (seeded by word content) averaged and normalized, with a codepoint-based
/// fallback when no word yields a vector.
pub struct DeterministicEmbedder {
    dimension: usize,
}

/// Fixed vocabulary of words with a known vector. A word outside this table
/// contributes nothing to the averaged embedding; text composed entirely of
/// out-of-vocabulary tokens
/// (numbers, rare or non-English words, punctuation-only noise) falls
/// through to the deterministic codepoint-based fallback below.
const VOCABULARY: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "of", "to", "in", "on",
    "at", "by", "for", "with", "about", "against", "between", "into", "through", "during",
    "before", "after", "above", "below", "from", "up", "down", "and", "or", "but", "if", "then",
    "this", "that", "these", "those", "it", "its", "they", "them", "their", "what", "which",
    "who", "whom", "how", "why", "when", "where", "can", "could", "should", "would", "will",
    "do", "does", "did", "has", "have", "had", "not", "no", "yes", "data", "document", "documents",
    "file", "files", "error", "errors", "bug", "bugs", "fix", "fixed", "build", "config",
    "configuration", "settings", "install", "search", "query", "queries", "delete", "remove",
    "create", "make", "update", "modify", "change", "function", "method", "issue", "problem",
    "performance", "speed", "security", "safety", "cell", "cells", "power", "powerhouse",
    "mitochondrion", "mitochondria", "energy", "system", "systems", "process", "processes",
    "information", "summary", "overview", "introduction", "test", "help", "hello", "hi", "hey",
    "ok", "okay", "thanks", "thank", "you", "text", "content", "context", "answer", "question",
    "model", "models", "score", "scores", "rank", "ranked", "vector", "vectors", "embedding",
    "embeddings", "index", "indexes", "retrieval", "retrieve", "chunk", "chunks",
];

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn with_default_dimension() -> Self {
        Self::new(512)
    }

    /// Deterministic vector for a word in the fixed vocabulary, derived from
    /// a stable hash of the word, standing in for a learned embedding table.
    /// Returns `None` for words outside `VOCABULARY`.
    fn word_vector(&self, word: &str) -> Option<Vec<f32>> {
        if word.is_empty() || !VOCABULARY.contains(&word) {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let seed = hasher.finish();
        let mut v = Vec::with_capacity(self.dimension);
        let mut state = seed;
        for _ in 0..self.dimension {
            // xorshift64* — fast, deterministic, good-enough bit dispersion.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0;
            v.push(unit);
        }
        Some(v)
    }

    /// Fallback embedding derived from character codepoints, length, word
    /// count, and a has-digits feature. Guarantees the same
    /// text always yields the same vector even when no word has a learned
    /// vector.
    fn fallback_vector(&self, text: &str, word_count: usize) -> Vec<f32> {
        let has_digits = text.chars().any(|c| c.is_ascii_digit());
        let len = text.chars().count();
        let codepoint_sum: u64 = text.chars().map(|c| c as u64).sum();
        let mut state = codepoint_sum
            .wrapping_add(len as u64)
            .wrapping_add((word_count as u64).wrapping_mul(31))
            .wrapping_add(if has_digits { 0x9E3779B9 } else { 1 });
        if state == 0 {
            state = 0xDEAD_BEEF;
        }
        let mut v = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let mixed = state.wrapping_add(i as u64);
            let unit = (mixed as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0;
            v.push(unit);
        }
        v
    }
}

fn tokenize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = vector_norm(&v);
    if norm > 1e-9 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

impl EmbeddingProvider for DeterministicEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let words = tokenize_words(trimmed);
        let mut accum = vec![0.0f32; self.dimension];
        let mut hits = 0usize;
        for w in &words {
            if let Some(v) = self.word_vector(w.as_str()) {
                for (a, b) in accum.iter_mut().zip(v.iter()) {
                    *a += b;
                }
                hits += 1;
            }
        }

        let raw = if hits == 0 {
            self.fallback_vector(trimmed, words.len())
        } else {
            for a in accum.iter_mut() {
                *a /= hits as f32;
            }
            accum
        };

        let normalized = l2_normalize(raw);

        if normalized.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::DegenerateVector);
        }
        let magnitude = vector_norm(&normalized);
        if magnitude < 1e-4 {
            return Err(EngineError::DegenerateVector);
        }

        Ok(normalized)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_yields_same_vector() {
        let e = DeterministicEmbedder::new(64);
        let a = e.embed("the mitochondrion is the powerhouse of the cell").unwrap();
        let b = e.embed("the mitochondrion is the powerhouse of the cell").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn vector_has_expected_dimension_and_is_unit_norm() {
        let e = DeterministicEmbedder::new(128);
        let v = e.embed("hello world").unwrap();
        assert_eq!(v.len(), 128);
        assert!((vector_norm(&v) - 1.0).abs() < 1e-3);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn empty_input_fails() {
        let e = DeterministicEmbedder::new(64);
        assert!(matches!(e.embed("   "), Err(EngineError::EmptyInput)));
    }

    #[test]
    fn fallback_path_used_for_non_word_text_is_deterministic() {
        let e = DeterministicEmbedder::new(32);
        let a = e.embed("12345").unwrap();
        let b = e.embed("12345").unwrap();
        assert_eq!(a, b);
        let c = e.embed("67890").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn batch_embed_respects_cancellation() {
        let e = DeterministicEmbedder::new(16);
        let texts = vec!["a", "b", "c"];
        let result = e.embed_batch(&texts, &|| true);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
