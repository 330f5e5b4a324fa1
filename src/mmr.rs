//! C7 — MMR Diversifier.
//!
//! Grounded on `rag_engine.rs`'s `apply_mmr_diversity` (penalize-and-resort
//! style) but rewritten to true embedding-space Maximal Marginal Relevance
//! (the base crate's MMR is a doc-id repeat-penalty heuristic, not this).

use crate::error::EngineError;
use crate::index::cosine_similarity;
use crate::types::{vector_norm, RetrievedChunk};

/// Greedily select up to `k` diverse candidates. The first selection is the
/// highest-similarity-to-query candidate; subsequent picks maximize
/// `lambda * sim_to_query - (1 - lambda) * max_sim_to_selected`.
/// Cancellation is checked once per outer iteration.
pub fn diversify(
    candidates: Vec<RetrievedChunk>,
    k: usize,
    lambda: f32,
    should_cancel: &dyn Fn() -> bool,
) -> Result<Vec<RetrievedChunk>, EngineError> {
    if candidates.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let mut remaining = candidates;
    remaining.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut selected: Vec<RetrievedChunk> = Vec::with_capacity(k.min(remaining.len()));
    selected.push(remaining.remove(0));

    while selected.len() < k && !remaining.is_empty() {
        if should_cancel() {
            return Err(EngineError::Cancelled);
        }

        let mut best_idx = 0usize;
        let mut best_score = f32::MIN;
        for (idx, cand) in remaining.iter().enumerate() {
            let cand_norm = vector_norm(&cand.chunk.embedding);
            let max_sim_to_selected = selected
                .iter()
                .map(|s| cosine_similarity(&cand.chunk.embedding, &s.chunk.embedding, cand_norm))
                .fold(f32::MIN, f32::max);
            let mmr_score = lambda * cand.similarity - (1.0 - lambda) * max_sim_to_selected;
            if mmr_score > best_score {
                best_score = mmr_score;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }

    Ok(selected
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            c.rank = i + 1;
            c
        })
        .collect())
}
