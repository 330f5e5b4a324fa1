//! C3 — BM25 Scorer.
//!
//! Grounded on the tokenize/IDF/score-loop shape of
//! `examples/arclabs561-rank-rank/crates/rank-retrieve/src/bm25.rs`,
//! overridden to fixed BM25 constants and per-query snapshot semantics
//! (the base crate has no from-scratch BM25 of its own — it delegates to
//! Tantivy).

use crate::config::Bm25Config;
use crate::types::Bm25Snapshot;
use rayon::prelude::*;
use std::collections::HashMap;

/// Unicode-aware word tokenization: lowercase, strip leading/trailing
/// punctuation from each whitespace-split token, drop empties.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Build a snapshot from a candidate set's contents — never mutates a
/// persistent index.
pub fn build_snapshot(candidates: &[&str]) -> Bm25Snapshot {
    let mut document_frequencies: HashMap<String, usize> = HashMap::new();
    let mut total_len = 0usize;

    for content in candidates {
        let tokens = tokenize(content);
        total_len += tokens.len();
        let unique: std::collections::HashSet<&String> = tokens.iter().collect();
        for term in unique {
            *document_frequencies.entry(term.clone()).or_insert(0) += 1;
        }
    }

    let total_documents = candidates.len();
    let avg_doc_length = if total_documents > 0 {
        total_len as f32 / total_documents as f32
    } else {
        0.0
    };

    Bm25Snapshot {
        document_frequencies,
        avg_doc_length,
        total_documents,
    }
}

fn idf(term: &str, snapshot: &Bm25Snapshot) -> f32 {
    let df = snapshot.document_frequencies.get(term).copied().unwrap_or(0) as f32;
    let n = snapshot.total_documents as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Score one document's content against a query string using the snapshot's
/// corpus statistics. Empty-token documents score 0.
pub fn score(content: &str, query: &str, snapshot: &Bm25Snapshot, cfg: &Bm25Config) -> f32 {
    let doc_tokens = tokenize(content);
    if doc_tokens.is_empty() || snapshot.total_documents == 0 {
        return 0.0;
    }
    let query_terms = tokenize(query);
    let doc_len = doc_tokens.len() as f32;

    let mut term_freqs: HashMap<&str, usize> = HashMap::new();
    for t in &doc_tokens {
        *term_freqs.entry(t.as_str()).or_insert(0) += 1;
    }

    let mut total = 0.0f32;
    for term in &query_terms {
        let tf = term_freqs.get(term.as_str()).copied().unwrap_or(0) as f32;
        if tf == 0.0 {
            continue;
        }
        let numerator = tf * (cfg.k1 + 1.0);
        let denominator = tf
            + cfg.k1 * (1.0 - cfg.b + cfg.b * doc_len / snapshot.avg_doc_length.max(1e-6));
        total += idf(term, snapshot) * (numerator / denominator);
    }
    total
}

/// Score an entire candidate set against a query, in input order.
/// Candidate list empty => empty scores.
pub fn score_candidates(
    candidates: &[&str],
    query: &str,
    snapshot: &Bm25Snapshot,
    cfg: &Bm25Config,
) -> Vec<f32> {
    candidates
        .par_iter()
        .map(|c| score(c, query, snapshot, cfg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Bm25Config {
        Bm25Config { k1: 1.5, b: 0.75 }
    }

    #[test]
    fn empty_candidates_give_empty_scores() {
        let snapshot = build_snapshot(&[]);
        let scores = score_candidates(&[], "anything", &snapshot, &cfg());
        assert!(scores.is_empty());
    }

    #[test]
    fn zero_token_candidate_scores_zero() {
        let snapshot = build_snapshot(&["   ", "real content here"]);
        let scores = score_candidates(&["   "], "content", &snapshot, &cfg());
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn matching_terms_outscore_non_matching() {
        let docs = ["the cat sat on the mat", "a completely unrelated sentence"];
        let snapshot = build_snapshot(&docs);
        let scores = score_candidates(&docs, "cat mat", &snapshot, &cfg());
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn tokenization_is_case_and_punctuation_insensitive() {
        let a = tokenize("Hello, World!");
        let b = tokenize("hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn term_frequency_saturates() {
        let cfg = cfg();
        let docs = ["word word word word word word word word", "word"];
        let snapshot = build_snapshot(&docs);
        let s1 = score(docs[0], "word", &snapshot, &cfg);
        let s2 = score(docs[1], "word", &snapshot, &cfg);
        // More repetitions score higher but sub-linearly (saturation), not >8x.
        assert!(s1 > s2);
        assert!(s1 < s2 * 8.0);
    }
}
