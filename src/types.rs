//! Core data model: `Chunk`, `Document`, `Container`,
//! `RetrievedChunk`, `QueryResult`, and the BM25 snapshot.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata carried alongside a chunk's text, populated at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub chunk_index: usize,
    pub start_position: usize,
    pub end_position: usize,
    pub page_number: Option<usize>,
    pub section_title: Option<String>,
    pub word_count: usize,
    pub top_keywords: Vec<String>,
    pub semantic_density: f32,
    pub has_numeric: bool,
    pub has_list: bool,
}

/// Immutable unit of retrieval.
///
/// Invariants enforced at construction / insert time: `embedding.len() == D`,
/// no NaN/Inf components, `||embedding|| ≈ 1 ± 1e-3`, `content` non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn validate(&self, expected_dim: usize) -> Result<(), crate::error::EngineError> {
        if self.embedding.len() != expected_dim {
            return Err(crate::error::EngineError::DimensionMismatch {
                expected: expected_dim,
                got: self.embedding.len(),
            });
        }
        if self.content.trim().is_empty() {
            return Err(crate::error::EngineError::EmptyInput);
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(crate::error::EngineError::DegenerateVector);
        }
        let norm = vector_norm(&self.embedding);
        if (norm - 1.0).abs() > 1e-3 {
            return Err(crate::error::EngineError::DegenerateVector);
        }
        Ok(())
    }
}

pub fn vector_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Logical source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub container_id: Uuid,
    pub total_chunks: usize,
    pub processing_metadata: Option<serde_json::Value>,
}

/// Isolation unit owning one vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: Uuid,
    pub name: String,
    pub embedding_dim: usize,
    pub strict_mode: bool,
}

/// A single retrieved result, with the rank it occupies within one result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub similarity: f32,
    pub rank: usize,
    pub source_document: Option<String>,
    pub page_number: Option<usize>,
}

/// Per-query telemetry and answer-quality metadata attached to a `QueryResult`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueryMetadata {
    pub ttft_ms: Option<u64>,
    pub total_time_ms: u64,
    pub tokens_generated: usize,
    pub tokens_per_second: Option<f32>,
    pub model_used: String,
    pub retrieval_time_ms: u64,
    pub strict_mode: bool,
    pub gating_decision: Option<String>,
}

/// The top-level result of one `PipelineOrchestrator::query` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: Uuid,
    pub retrieved_chunks: Vec<RetrievedChunk>,
    pub answer: String,
    pub metadata: QueryMetadata,
    pub confidence: f32,
    pub warnings: Vec<String>,
}

/// Corpus statistics built fresh from a query's dense candidate set
/// — never mutated globally.
#[derive(Debug, Clone, Default)]
pub struct Bm25Snapshot {
    pub document_frequencies: std::collections::HashMap<String, usize>,
    pub avg_doc_length: f32,
    pub total_documents: usize,
}
