//! C9 — Quality Assessor.
//!
//! New module implementing the confidence formula and warning rules;
//! grounded on `rag/retrieval_decision.rs`'s `RelevanceScore`/warning-list
//! style.

use crate::types::RetrievedChunk;

/// Inputs needed to score one query's answer quality.
pub struct QualityInputs<'a> {
    pub retrieved: &'a [RetrievedChunk],
    pub total_docs_in_container: usize,
    pub query_word_count: usize,
}

pub fn confidence(inputs: &QualityInputs) -> f32 {
    let top_sim = inputs.retrieved.first().map(|c| c.similarity).unwrap_or(0.0);
    let chunk_count = inputs.retrieved.len();
    let unique_sources: std::collections::HashSet<_> =
        inputs.retrieved.iter().map(|c| c.chunk.document_id).collect();

    0.5 * (top_sim / 0.8).min(1.0)
        + 0.2 * (chunk_count as f32 / 5.0).min(1.0)
        + 0.2 * (unique_sources.len() as f32 / inputs.total_docs_in_container.max(1) as f32).min(1.0)
        + 0.1 * (inputs.query_word_count as f32 / 5.0).min(1.0)
}

pub fn warnings(inputs: &QualityInputs) -> Vec<String> {
    let mut warnings = Vec::new();
    let top_sim = inputs.retrieved.first().map(|c| c.similarity).unwrap_or(0.0);
    let chunk_count = inputs.retrieved.len();
    let unique_sources: std::collections::HashSet<_> =
        inputs.retrieved.iter().map(|c| c.chunk.document_id).collect();

    if top_sim < 0.4 {
        warnings.push("Low relevance: top match similarity is below 0.4".to_string());
    } else if top_sim < 0.6 {
        warnings.push("Moderate relevance: top match similarity is below 0.6".to_string());
    }
    if chunk_count < 3 {
        warnings.push("Limited context: fewer than 3 supporting chunks were retrieved".to_string());
    }
    if unique_sources.len() == 1 && inputs.total_docs_in_container > 1 {
        warnings.push("Single source: answer is grounded in only one document".to_string());
    }
    if inputs.query_word_count <= 2 {
        warnings.push("Generic query: consider a more specific question".to_string());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkMetadata};
    use uuid::Uuid;

    fn chunk(doc: Uuid, similarity: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: Uuid::new_v4(),
                document_id: doc,
                content: "x".into(),
                embedding: vec![1.0],
                metadata: ChunkMetadata::default(),
            },
            similarity,
            rank: 1,
            source_document: None,
            page_number: None,
        }
    }

    #[test]
    fn single_high_sim_chunk_scores_positive_confidence_with_limited_context_warning() {
        let doc = Uuid::new_v4();
        let retrieved = vec![chunk(doc, 0.85)];
        let inputs = QualityInputs {
            retrieved: &retrieved,
            total_docs_in_container: 1,
            query_word_count: 4,
        };
        assert!(confidence(&inputs) > 0.0);
        let w = warnings(&inputs);
        assert!(w.iter().any(|s| s.contains("Limited context")));
        assert!(!w.iter().any(|s| s.contains("Low relevance")));
    }

    #[test]
    fn low_similarity_triggers_low_relevance_warning() {
        let doc = Uuid::new_v4();
        let retrieved = vec![chunk(doc, 0.2)];
        let inputs = QualityInputs {
            retrieved: &retrieved,
            total_docs_in_container: 3,
            query_word_count: 5,
        };
        assert!(warnings(&inputs).iter().any(|s| s.contains("Low relevance")));
    }

    #[test]
    fn single_source_warning_only_fires_with_multiple_docs_available() {
        let doc = Uuid::new_v4();
        let retrieved = vec![chunk(doc, 0.9), chunk(doc, 0.8), chunk(doc, 0.7)];
        let inputs = QualityInputs {
            retrieved: &retrieved,
            total_docs_in_container: 1,
            query_word_count: 5,
        };
        assert!(!warnings(&inputs).iter().any(|s| s.contains("Single source")));

        let inputs2 = QualityInputs {
            retrieved: &retrieved,
            total_docs_in_container: 5,
            query_word_count: 5,
        };
        assert!(warnings(&inputs2).iter().any(|s| s.contains("Single source")));
    }

    #[test]
    fn generic_query_warning_fires_for_short_queries() {
        let doc = Uuid::new_v4();
        let retrieved = vec![chunk(doc, 0.9)];
        let inputs = QualityInputs {
            retrieved: &retrieved,
            total_docs_in_container: 1,
            query_word_count: 1,
        };
        assert!(warnings(&inputs).iter().any(|s| s.contains("Generic query")));
    }
}
