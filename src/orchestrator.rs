//! C12 — Pipeline Orchestrator.
//!
//! Grounded on `rag_engine.rs::search_comprehensive`/`search_single_query`'s
//! stage-sequencing style (embed → fuse → log diagnostics → filter → build
//! results) and `chat/engine.rs::handle_search`'s gating/fallback-branching
//! shape, reimplementing this engine's own stage order, small-talk bypass,
//! and telemetry event names rather than the base crate's query-decomposition
//! + LanceDB/Tantivy fusion.

use crate::bm25::{self};
use crate::config::{EngineConfig, GatingConfig};
use crate::container::{self, ContainerId};
use crate::embedding::EmbeddingProvider;
use crate::error::EngineError;
use crate::hybrid::hybrid_search;
use crate::index::VectorIndex;
use crate::llm::{GenerationConfig, LlmBackend, LlmGateway, StreamSink};
use crate::mmr;
use crate::quality::{self, QualityInputs};
use crate::reranker;
use crate::types::{Container, QueryMetadata, QueryResult, RetrievedChunk};
use crate::{context_assembler, query_expander};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const SMALL_TALK: &[&str] = &[
    "hi", "hello", "hey", "yo", "sup", "ok", "thanks", "thank you", "bye", "goodbye", "hola", "hiya",
];

fn log_stage(name: &'static str, started: Instant) {
    tracing::info!(duration_ms = started.elapsed().as_millis() as u64, stage = name, "{}", name);
}

pub struct PipelineOrchestrator {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    gateway: Arc<LlmGateway>,
    extractive_backend: Arc<dyn LlmBackend>,
    config: EngineConfig,
    container: Container,
    total_docs_in_container: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        gateway: Arc<LlmGateway>,
        extractive_backend: Arc<dyn LlmBackend>,
        config: EngineConfig,
        container: Container,
        total_docs_in_container: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            gateway,
            extractive_backend,
            config,
            container,
            total_docs_in_container,
        }
    }

    /// Top-level entry point.
    pub async fn query(
        &self,
        question: &str,
        k: usize,
        container_id: Option<ContainerId>,
        stream_sink: Option<&dyn StreamSink>,
        should_cancel: &dyn Fn() -> bool,
    ) -> Result<QueryResult, EngineError> {
        let overall_started = Instant::now();
        let stage_started = Instant::now();

        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        log_stage("Query received", stage_started);

        let query_words = trimmed.split_whitespace().count();
        let effective_k = if query_words <= 2 { k.min(3) } else { k.min(10) }.max(1);

        let scope = container_id.map(|id| container::enter(id, None));
        let _scope_guard = scope;

        let normalized_lower = trimmed.to_lowercase();
        if query_words <= 2 && SMALL_TALK.contains(&normalized_lower.as_str()) {
            return self.direct_chat(trimmed, overall_started, "small_talk", stream_sink).await;
        }

        if self.index.count() == 0 {
            return self.direct_chat(trimmed, overall_started, "empty_index", stream_sink).await;
        }

        if should_cancel() {
            return Err(EngineError::Cancelled);
        }

        let retrieval_started = Instant::now();
        let stage_started = Instant::now();
        let variants = query_expander::expand(trimmed);
        let expanded_query = variants.join(" ");
        log_stage("Query expanded", stage_started);

        let stage_started = Instant::now();
        let query_embedding = match self.embedder.embed(trimmed) {
            Ok(v) => v,
            Err(EngineError::EmptyInput) => return Err(EngineError::EmptyQuery),
            Err(e) => return Err(e),
        };
        if query_embedding.len() != self.container.embedding_dim {
            tracing::warn!(
                expected = self.container.embedding_dim,
                got = query_embedding.len(),
                "Query embedding dimension mismatch against container"
            );
        }
        log_stage("Query embedding", stage_started);

        if should_cancel() {
            return Err(EngineError::Cancelled);
        }

        let stage_started = Instant::now();
        let dense_fused = hybrid_search(
            &self.index,
            &query_embedding,
            &expanded_query,
            2 * effective_k,
            &self.config.rrf,
            &self.config.bm25,
        )?;
        log_stage("Hybrid retrieval", stage_started);

        if dense_fused.is_empty() {
            return self.direct_chat(trimmed, overall_started, "retrieval_empty", stream_sink).await;
        }

        if should_cancel() {
            return Err(EngineError::Cancelled);
        }

        let stage_started = Instant::now();
        let reranked = reranker::rerank(trimmed, dense_fused, effective_k, &self.config.reranker);
        log_stage("Re-ranking complete", stage_started);
        let retrieval_time_ms = retrieval_started.elapsed().as_millis() as u64;

        let stage_started = Instant::now();
        let trivial = query_expander::is_trivial_query(trimmed);
        let lenient = false; // no caller-supplied lenient override in this engine's public surface yet.
        let gating = apply_gating(reranked, self.container.strict_mode, lenient, trivial, effective_k, &self.config.gating);
        log_stage("Gating metrics", stage_started);

        if gating.strict_blocked {
            return self.strict_blocked_response(gating.chunks, overall_started);
        }

        if gating.fallback_ondevice {
            return self
                .fallback_ondevice_response(trimmed, gating.chunks, effective_k, overall_started, stream_sink)
                .await;
        }

        if should_cancel() {
            return Err(EngineError::Cancelled);
        }

        let stage_started = Instant::now();
        let mmr_lambda = if self.container.strict_mode {
            self.config.mmr.lambda_strict
        } else {
            self.config.mmr.lambda_default
        };
        let diversified = mmr::diversify(gating.chunks, effective_k, mmr_lambda, should_cancel)?;
        log_stage("MMR diversification", stage_started);

        let stage_started = Instant::now();
        let max_chars = self.context_char_budget();
        let (assembled, chunks_used) = context_assembler::assemble(&diversified, max_chars);
        log_stage("Context assembled", stage_started);
        let _ = chunks_used;

        if should_cancel() {
            return Err(EngineError::Cancelled);
        }

        let stage_started = Instant::now();
        let generation_config = GenerationConfig::default();
        let generation = self
            .gateway
            .generate(trimmed, Some(&assembled), &generation_config, stream_sink)
            .await?;
        log_stage("Response generated", stage_started);

        let stage_started = Instant::now();
        let quality_inputs = QualityInputs {
            retrieved: &diversified,
            total_docs_in_container: self.total_docs_in_container,
            query_word_count: query_words,
        };
        let confidence = quality::confidence(&quality_inputs);
        let mut warnings = quality::warnings(&quality_inputs);
        if gating.decision.starts_with("override") {
            warnings.push(format!("Retrieval relaxed via gating override ({})", gating.decision));
        }
        log_stage("Response evaluated", stage_started);

        log_stage("Query complete", overall_started);

        Ok(QueryResult {
            query_id: Uuid::new_v4(),
            retrieved_chunks: diversified,
            answer: generation.text,
            metadata: QueryMetadata {
                ttft_ms: generation.ttft_ms,
                total_time_ms: overall_started.elapsed().as_millis() as u64,
                tokens_generated: generation.tokens_generated,
                tokens_per_second: tokens_per_second(generation.tokens_generated, generation.total_time_ms),
                model_used: generation.model_name,
                retrieval_time_ms,
                strict_mode: self.container.strict_mode,
                gating_decision: Some(gating.decision),
            },
            confidence,
            warnings,
        })
    }

    fn context_char_budget(&self) -> usize {
        match self.gateway.primary_context_category() {
            crate::llm::ContextCategory::Cloud => self.config.context.max_chars_cloud,
            crate::llm::ContextCategory::TinyOnDevice => self.config.context.max_chars_tiny_ondevice,
            crate::llm::ContextCategory::Other => self.config.context.max_chars_default,
        }
    }

    async fn direct_chat(
        &self,
        question: &str,
        overall_started: Instant,
        reason: &'static str,
        stream_sink: Option<&dyn StreamSink>,
    ) -> Result<QueryResult, EngineError> {
        let generation_config = GenerationConfig::default();
        let generation = self.gateway.generate(question, None, &generation_config, stream_sink).await?;
        log_stage("Query complete", overall_started);

        let warning = match reason {
            "retrieval_empty" => "no relevant context was found; replied without RAG context".to_string(),
            _ => "replied without RAG context".to_string(),
        };

        Ok(QueryResult {
            query_id: Uuid::new_v4(),
            retrieved_chunks: Vec::new(),
            answer: generation.text,
            metadata: QueryMetadata {
                ttft_ms: generation.ttft_ms,
                total_time_ms: overall_started.elapsed().as_millis() as u64,
                tokens_generated: generation.tokens_generated,
                tokens_per_second: tokens_per_second(generation.tokens_generated, generation.total_time_ms),
                model_used: generation.model_name,
                retrieval_time_ms: 0,
                strict_mode: self.container.strict_mode,
                gating_decision: Some(reason.to_string()),
            },
            confidence: 0.0,
            warnings: vec![warning],
        })
    }

    fn strict_blocked_response(&self, reranked: Vec<RetrievedChunk>, overall_started: Instant) -> Result<QueryResult, EngineError> {
        let top_three: Vec<String> = reranked
            .iter()
            .take(3)
            .map(|c| {
                let name = c.source_document.clone().unwrap_or_else(|| "unknown document".to_string());
                format!("{} ({:.1}%)", name, c.similarity * 100.0)
            })
            .collect();

        let answer = if top_three.is_empty() {
            "I don't have enough supporting evidence in the indexed documents to answer confidently.".to_string()
        } else {
            format!(
                "I don't have enough supporting evidence to answer confidently. The closest sources are: {}",
                top_three.join(", ")
            )
        };

        log_stage("Query complete", overall_started);

        Ok(QueryResult {
            query_id: Uuid::new_v4(),
            retrieved_chunks: reranked,
            answer,
            metadata: QueryMetadata {
                ttft_ms: None,
                total_time_ms: overall_started.elapsed().as_millis() as u64,
                tokens_generated: 0,
                tokens_per_second: None,
                model_used: "none".to_string(),
                retrieval_time_ms: 0,
                strict_mode: true,
                gating_decision: Some("strict_blocked".to_string()),
            },
            confidence: 0.0,
            warnings: vec!["insufficient supporting evidence".to_string()],
        })
    }

    async fn fallback_ondevice_response(
        &self,
        question: &str,
        reranked: Vec<RetrievedChunk>,
        k: usize,
        overall_started: Instant,
        stream_sink: Option<&dyn StreamSink>,
    ) -> Result<QueryResult, EngineError> {
        let take = k.max(3);
        let context_chunks: Vec<RetrievedChunk> = reranked.iter().take(take).cloned().collect();
        let max_chars = match self.gateway.primary_context_category() {
            crate::llm::ContextCategory::TinyOnDevice => 1200,
            _ => 2500,
        };
        let (assembled, _) = context_assembler::assemble(&context_chunks, max_chars);

        let generation_config = GenerationConfig::default();
        let generation = self
            .extractive_backend
            .generate(question, Some(&assembled), &generation_config, stream_sink)
            .await?;

        log_stage("Query complete", overall_started);

        Ok(QueryResult {
            query_id: Uuid::new_v4(),
            retrieved_chunks: reranked,
            answer: generation.text,
            metadata: QueryMetadata {
                ttft_ms: generation.ttft_ms,
                total_time_ms: overall_started.elapsed().as_millis() as u64,
                tokens_generated: generation.tokens_generated,
                tokens_per_second: tokens_per_second(generation.tokens_generated, generation.total_time_ms),
                model_used: generation.model_name,
                retrieval_time_ms: 0,
                strict_mode: self.container.strict_mode,
                gating_decision: Some("fallback_ondevice_low_confidence".to_string()),
            },
            confidence: 0.0,
            warnings: vec!["no high-confidence context".to_string()],
        })
    }
}

fn tokens_per_second(tokens: usize, total_time_ms: u64) -> Option<f32> {
    if total_time_ms == 0 {
        return None;
    }
    Some(tokens as f32 / (total_time_ms as f32 / 1000.0))
}

struct GatingOutcome {
    chunks: Vec<RetrievedChunk>,
    decision: String,
    strict_blocked: bool,
    fallback_ondevice: bool,
}

/// Gating, coverage, and fallback/override logic, applied to
/// the `3k` re-ranked candidate pool before MMR.
fn apply_gating(
    reranked: Vec<RetrievedChunk>,
    strict_mode: bool,
    lenient: bool,
    trivial: bool,
    k: usize,
    cfg: &GatingConfig,
) -> GatingOutcome {
    if reranked.is_empty() {
        return GatingOutcome {
            chunks: Vec::new(),
            decision: "empty_candidates".to_string(),
            strict_blocked: false,
            fallback_ondevice: false,
        };
    }

    let relaxed = lenient || trivial;
    let min_sim = if strict_mode && !relaxed { cfg.min_sim_strict } else { cfg.min_sim_default };

    let top = reranked[0].similarity;
    let second = reranked.get(1).map(|c| c.similarity).unwrap_or(0.0);
    let take5 = reranked.len().min(5);
    let avg5 = reranked[..take5].iter().map(|c| c.similarity).sum::<f32>() / take5 as f32;

    let overridden = top >= cfg.override_top_high
        || (top >= cfg.override_top_mid && top - avg5 >= cfg.override_top_avg_gap)
        || (top - second >= cfg.override_top_second_gap);

    if strict_mode && !overridden && !relaxed {
        let high_conf_count = reranked.iter().filter(|c| c.similarity >= cfg.strict_block_threshold).count();
        if high_conf_count < cfg.strict_block_min_count {
            return GatingOutcome {
                chunks: reranked,
                decision: "strict_blocked".to_string(),
                strict_blocked: true,
                fallback_ondevice: false,
            };
        }
    }

    let filtered: Vec<RetrievedChunk> = reranked.iter().filter(|c| c.similarity >= min_sim).cloned().collect();

    if filtered.is_empty() {
        if overridden || relaxed {
            let fallback: Vec<RetrievedChunk> = reranked.into_iter().take(2 * k).collect();
            return GatingOutcome {
                chunks: fallback,
                decision: "override_fallback_top_2k".to_string(),
                strict_blocked: false,
                fallback_ondevice: false,
            };
        }
        return GatingOutcome {
            chunks: reranked,
            decision: "fallback_ondevice_low_confidence".to_string(),
            strict_blocked: false,
            fallback_ondevice: true,
        };
    }

    let unique_docs: HashSet<Uuid> = reranked.iter().map(|c| c.chunk.document_id).collect();
    let mut result = filtered;
    if unique_docs.len() > 1 {
        let target_coverage = unique_docs.len().min(k.min(3));
        let mut have_docs: HashSet<Uuid> = result.iter().map(|c| c.chunk.document_id).collect();
        if have_docs.len() < target_coverage {
            let have_ids: HashSet<Uuid> = result.iter().map(|c| c.chunk.id).collect();
            let capacity = (2 * k).max(result.len());
            for cand in &reranked {
                if result.len() >= capacity || have_docs.len() >= target_coverage {
                    break;
                }
                if have_ids.contains(&cand.chunk.id) {
                    continue;
                }
                if !have_docs.contains(&cand.chunk.document_id) {
                    have_docs.insert(cand.chunk.document_id);
                    result.push(cand.clone());
                }
            }
            result.sort_by(|a, b| a.rank.cmp(&b.rank));
        }
    }

    let decision = if overridden { "override_accepted".to_string() } else { "accepted".to_string() };
    GatingOutcome {
        chunks: result,
        decision,
        strict_blocked: false,
        fallback_ondevice: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatingConfig;
    use crate::types::{Chunk, ChunkMetadata};

    fn gating_cfg() -> GatingConfig {
        GatingConfig {
            min_sim_strict: 0.52,
            min_sim_default: 0.35,
            override_top_high: 0.50,
            override_top_mid: 0.38,
            override_top_avg_gap: 0.05,
            override_top_second_gap: 0.07,
            strict_block_threshold: 0.52,
            strict_block_min_count: 3,
        }
    }

    fn candidate(doc: Uuid, similarity: f32, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: Uuid::new_v4(),
                document_id: doc,
                content: "content".to_string(),
                embedding: vec![1.0],
                metadata: ChunkMetadata::default(),
            },
            similarity,
            rank,
            source_document: Some("doc.txt".to_string()),
            page_number: None,
        }
    }

    #[test]
    fn empty_candidates_yield_empty_gating_outcome() {
        let outcome = apply_gating(vec![], false, false, false, 5, &gating_cfg());
        assert!(outcome.chunks.is_empty());
        assert_eq!(outcome.decision, "empty_candidates");
    }

    #[test]
    fn strict_mode_blocks_when_fewer_than_three_high_confidence_chunks() {
        let doc = Uuid::new_v4();
        let candidates = vec![candidate(doc, 0.6, 1), candidate(doc, 0.55, 2)];
        let outcome = apply_gating(candidates, true, false, false, 5, &gating_cfg());
        assert!(outcome.strict_blocked);
    }

    #[test]
    fn strict_mode_does_not_block_with_enough_high_confidence_chunks() {
        let doc = Uuid::new_v4();
        let candidates = vec![
            candidate(doc, 0.6, 1),
            candidate(doc, 0.55, 2),
            candidate(doc, 0.53, 3),
        ];
        let outcome = apply_gating(candidates, true, false, false, 5, &gating_cfg());
        assert!(!outcome.strict_blocked);
    }

    #[test]
    fn low_similarity_pool_with_no_override_routes_to_ondevice_fallback() {
        let doc = Uuid::new_v4();
        let candidates = vec![candidate(doc, 0.2, 1), candidate(doc, 0.18, 2)];
        let outcome = apply_gating(candidates, false, false, false, 5, &gating_cfg());
        assert!(outcome.fallback_ondevice);
    }

    #[test]
    fn trivial_query_relaxes_threshold_and_accepts_low_similarity() {
        let doc = Uuid::new_v4();
        let candidates = vec![candidate(doc, 0.4, 1), candidate(doc, 0.36, 2)];
        let outcome = apply_gating(candidates, true, false, true, 5, &gating_cfg());
        assert!(!outcome.fallback_ondevice);
        assert!(!outcome.chunks.is_empty());
    }

    #[test]
    fn coverage_patch_pulls_in_a_missing_document() {
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let candidates = vec![
            candidate(doc_a, 0.9, 1),
            candidate(doc_a, 0.85, 2),
            candidate(doc_b, 0.2, 3),
        ];
        let outcome = apply_gating(candidates, false, false, false, 5, &gating_cfg());
        let docs: HashSet<Uuid> = outcome.chunks.iter().map(|c| c.chunk.document_id).collect();
        assert!(docs.contains(&doc_b));
    }

    #[test]
    fn override_fires_on_high_top_similarity() {
        let doc = Uuid::new_v4();
        let candidates = vec![candidate(doc, 0.9, 1), candidate(doc, 0.1, 2)];
        let outcome = apply_gating(candidates, false, false, false, 5, &gating_cfg());
        assert_eq!(outcome.decision, "override_accepted");
    }
}
