//! Deterministic, non-ML retrieval-augmented generation query engine.
//!
//! The public entry point is [`orchestrator::PipelineOrchestrator`], which
//! runs a query through expansion, hybrid retrieval, re-ranking, diversity
//! selection, context assembly, and LLM generation, configured via
//! [`config::EngineConfig`]. See `SPEC_FULL.md` for the full component map.

pub mod bm25;
pub mod config;
pub mod container;
pub mod context_assembler;
pub mod embedding;
pub mod error;
pub mod hybrid;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod mmr;
pub mod orchestrator;
pub mod persistence;
pub mod quality;
pub mod query_expander;
pub mod reranker;
pub mod tools;
pub mod types;

pub use config::EngineConfig;
pub use container::{ContainerId, ContainerScope};
pub use error::EngineError;
pub use orchestrator::PipelineOrchestrator;
pub use types::{Chunk, ChunkMetadata, Container, Document, QueryResult, RetrievedChunk};

pub use anyhow::Result;
pub use uuid::Uuid;
