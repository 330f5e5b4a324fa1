//! C6 — Re-ranker.
//!
//! Grounded on `rag_engine.rs`'s `search_single_query` scoring/sorting
//! pipeline shape, adding a term-proximity signal the base crate has no
//! equivalent for (new code, grounded on the same file's tokenization
//! conventions).

use crate::config::RerankerConfig;
use crate::types::RetrievedChunk;
use rayon::prelude::*;

fn lower_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn keyword_overlap(query_terms: &[String], doc_tokens: &[String]) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let doc_set: std::collections::HashSet<&String> = doc_tokens.iter().collect();
    let query_set: std::collections::HashSet<&String> = query_terms.iter().collect();
    let overlap = query_set.intersection(&doc_set).count();
    overlap as f32 / query_terms.len().max(1) as f32
}

fn proximity_score(query_terms: &[String], doc_tokens: &[String]) -> f32 {
    if query_terms.len() < 2 {
        return 0.0;
    }
    let positions: Vec<(usize, &String)> = doc_tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| query_terms.contains(t))
        .collect();

    let mut min_dist = usize::MAX;
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            if positions[i].1 != positions[j].1 {
                let dist = positions[j].0.abs_diff(positions[i].0);
                min_dist = min_dist.min(dist);
            }
        }
    }
    if min_dist == usize::MAX {
        0.0
    } else {
        1.0 / (min_dist as f32 + 1.0)
    }
}

fn position_score(chunk_index: usize) -> f32 {
    1.0 / (chunk_index as f32 + 10.0)
}

/// Compute `rerank_score` for each candidate and return the top `3k`,
/// descending, ties broken by `s_sem` (stored similarity).
pub fn rerank(
    query: &str,
    candidates: Vec<RetrievedChunk>,
    k: usize,
    cfg: &RerankerConfig,
) -> Vec<RetrievedChunk> {
    let query_terms: Vec<String> = lower_tokens(query)
        .into_iter()
        .filter(|t| t.len() > 2)
        .collect();

    let mut scored: Vec<(f32, RetrievedChunk)> = candidates
        .into_par_iter()
        .map(|c| {
            let doc_tokens = lower_tokens(&c.chunk.content);
            let s_sem = c.similarity;
            let s_kw = keyword_overlap(&query_terms, &doc_tokens);
            let s_prox = proximity_score(&query_terms, &doc_tokens);
            let s_pos = position_score(c.chunk.metadata.chunk_index);
            let score = s_sem
                + cfg.w_keyword * s_kw
                + cfg.w_proximity * s_prox
                + cfg.w_position * s_pos;
            (score, c)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.1.similarity.partial_cmp(&a.1.similarity).unwrap_or(std::cmp::Ordering::Equal))
    });

    scored
        .into_iter()
        .take(3 * k)
        .enumerate()
        .map(|(i, (_, mut c))| {
            c.rank = i + 1;
            c
        })
        .collect()
}
