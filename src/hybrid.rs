//! C5 — Hybrid Searcher.
//!
//! Grounded on `search/hybrid.rs`'s `HashMap<id,(score,source)>`-accumulate-
//! then-sort shape, replacing `score_aware_rrf`'s min-max normalization trick
//! with a fixed-weight RRF formula. Keyword-only documents (not in the
//! dense candidate set) intentionally never enter the fused result.

use crate::bm25::{self, score_candidates};
use crate::config::{Bm25Config, RrfConfig};
use crate::index::VectorIndex;
use crate::types::RetrievedChunk;
use std::collections::HashMap;
use uuid::Uuid;

/// Dense top-`2k` search, BM25 rescoring over those candidates, and RRF
/// fusion of the two rank orderings.
pub fn hybrid_search(
    index: &VectorIndex,
    query_embedding: &[f32],
    expanded_query: &str,
    k: usize,
    rrf: &RrfConfig,
    bm25_cfg: &Bm25Config,
) -> Result<Vec<RetrievedChunk>, crate::error::EngineError> {
    let dense_k = 2 * k;
    let dense = index.search(query_embedding, dense_k)?;
    if dense.is_empty() {
        return Ok(Vec::new());
    }

    let contents: Vec<&str> = dense.iter().map(|r| r.chunk.content.as_str()).collect();
    let snapshot = bm25::build_snapshot(&contents);
    let bm25_scores = score_candidates(&contents, expanded_query, &snapshot, bm25_cfg);

    // Dense rank is already 1-based/descending from VectorIndex::search.
    let dense_ranks: HashMap<Uuid, usize> = dense
        .iter()
        .map(|r| (r.chunk.id, r.rank - 1))
        .collect();

    let mut bm25_ranked: Vec<(Uuid, f32)> = dense
        .iter()
        .zip(bm25_scores.iter())
        .map(|(r, s)| (r.chunk.id, *s))
        .collect();
    bm25_ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let bm25_ranks: HashMap<Uuid, usize> = bm25_ranked
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (*id, i))
        .collect();

    let mut fused: Vec<(RetrievedChunk, f32)> = dense
        .into_iter()
        .map(|r| {
            let id = r.chunk.id;
            let dense_rank = *dense_ranks.get(&id).unwrap_or(&usize::MAX);
            let bm25_rank = *bm25_ranks.get(&id).unwrap_or(&usize::MAX);
            let dense_term = rrf.w_vector / (rrf.k_rrf + dense_rank as f32 + 1.0);
            let keyword_term = rrf.w_keyword / (rrf.k_rrf + bm25_rank as f32 + 1.0);
            let score = dense_term + keyword_term;
            (r, score)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.rank.cmp(&b.0.rank))
    });

    Ok(fused
        .into_iter()
        .enumerate()
        .map(|(i, (mut r, _))| {
            r.rank = i + 1;
            r
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkMetadata};

    fn unit(v: Vec<f32>) -> Vec<f32> {
        let n = crate::types::vector_norm(&v);
        v.into_iter().map(|x| x / n).collect()
    }

    fn chunk(doc: Uuid, v: Vec<f32>, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            document_id: doc,
            content: content.to_string(),
            embedding: unit(v),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn keyword_only_documents_never_enter_fused_result() {
        let index = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        let c1 = chunk(doc, vec![1.0, 0.0, 0.0, 0.0], "apples and oranges");
        index.insert(c1.clone()).unwrap();

        let rrf = RrfConfig {
            k_rrf: 60.0,
            w_vector: 0.7,
            w_keyword: 0.3,
        };
        let bm25_cfg = Bm25Config { k1: 1.5, b: 0.75 };

        let results = hybrid_search(&index, &unit(vec![1.0, 0.0, 0.0, 0.0]), "apples", 5, &rrf, &bm25_cfg)
            .unwrap();
        // Only the single dense candidate is present; no ghost keyword doc appears.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, c1.id);
    }

    #[test]
    fn empty_index_yields_empty_fusion() {
        let index = VectorIndex::new(4);
        let rrf = RrfConfig {
            k_rrf: 60.0,
            w_vector: 0.7,
            w_keyword: 0.3,
        };
        let bm25_cfg = Bm25Config { k1: 1.5, b: 0.75 };
        let results =
            hybrid_search(&index, &unit(vec![1.0, 0.0, 0.0, 0.0]), "q", 5, &rrf, &bm25_cfg).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn ranks_are_dense_and_ordered() {
        let index = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        for i in 0..3 {
            index
                .insert(chunk(doc, vec![1.0, i as f32 * 0.1, 0.0, 0.0], "keyword content here"))
                .unwrap();
        }
        let rrf = RrfConfig {
            k_rrf: 60.0,
            w_vector: 0.7,
            w_keyword: 0.3,
        };
        let bm25_cfg = Bm25Config { k1: 1.5, b: 0.75 };
        let results = hybrid_search(
            &index,
            &unit(vec![1.0, 0.0, 0.0, 0.0]),
            "keyword",
            3,
            &rrf,
            &bm25_cfg,
        )
        .unwrap();
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i + 1);
        }
    }
}
