//! C11 — Tool Handler.
//!
//! Grounded on `agent/rag_tools.rs`'s `AgentTool`-trait shape
//! (`id`/`description`/`parameters_schema`/`execute`), narrowed to this
//! engine's three functions and output formatting. The base crate's
//! `ListSourcesTool`/`get_document_chunks`-style extras have no counterpart
//! here and are dropped.

use crate::container::ContainerId;
use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::llm::ToolSchema;
use crate::types::Document;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PREVIEW_CHARS: usize = 600;
const TRUNCATION_SUFFIX: &str = " [...]";

/// Process-wide tool-call counter: incremented by every
/// tool call, read-and-reset by the gateway once generation ends.
static TOOL_CALL_COUNT: AtomicUsize = AtomicUsize::new(0);

pub fn record_tool_call() {
    TOOL_CALL_COUNT.fetch_add(1, Ordering::SeqCst);
}

/// Read the counter and reset it to zero, returning the prior value.
pub fn take_tool_call_count() -> usize {
    TOOL_CALL_COUNT.swap(0, Ordering::SeqCst)
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Dispatch a call by name with a raw JSON-arguments string, scoped to
    /// whatever container the caller installed via `container_id`.
    async fn call(&self, name: &str, arguments_json: &str) -> String;
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

fn format_relevance(similarity: f32) -> String {
    format!("{:.1}%", (similarity * 100.0).clamp(0.0, 100.0))
}

/// The live implementation, holding an index-per-container map and a
/// document registry, analogous to the teacher's `Arc<RwLock<RAGEngine>>`
/// handle but scoped to the engine's container model.
pub struct LiveToolHandler {
    indexes: HashMap<ContainerId, Arc<VectorIndex>>,
    documents: HashMap<ContainerId, Vec<Document>>,
    embedder: Arc<dyn EmbeddingProvider>,
    current_container: ContainerId,
}

impl LiveToolHandler {
    pub fn new(
        indexes: HashMap<ContainerId, Arc<VectorIndex>>,
        documents: HashMap<ContainerId, Vec<Document>>,
        embedder: Arc<dyn EmbeddingProvider>,
        current_container: ContainerId,
    ) -> Self {
        Self {
            indexes,
            documents,
            embedder,
            current_container,
        }
    }

    fn search_documents(&self, query: &str, top_k: usize, min_sim: f32) -> String {
        record_tool_call();
        let Some(index) = self.indexes.get(&self.current_container) else {
            return "No documents are indexed in this container.".to_string();
        };

        let embedding = match self.embedder.embed(query) {
            Ok(v) => v,
            Err(e) => return format!("Could not process the search query: {}", e.user_message()),
        };

        let results = match index.search(&embedding, top_k) {
            Ok(r) => r,
            Err(e) => return format!("Search failed: {}", e.user_message()),
        };

        let filtered: Vec<_> = results.into_iter().filter(|r| r.similarity >= min_sim).collect();
        if filtered.is_empty() {
            return format!("No results found for: '{}'", query);
        }

        let docs = self.documents.get(&self.current_container);
        let header = format!("Found {} relevant chunks:", filtered.len());
        let body = filtered
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let doc_name = docs
                    .and_then(|d| d.iter().find(|d| d.id == r.chunk.document_id))
                    .map(|d| d.filename.clone())
                    .unwrap_or_else(|| "unknown document".to_string());
                let page_suffix = r
                    .page_number
                    .map(|p| format!(" (Page {})", p))
                    .unwrap_or_default();
                format!(
                    "[{}] From {}{} (Relevance: {}):\n{}",
                    i + 1,
                    doc_name,
                    page_suffix,
                    format_relevance(r.similarity),
                    truncate_preview(&r.chunk.content)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("{}\n\n{}", header, body)
    }

    fn list_documents(&self) -> String {
        record_tool_call();
        let Some(docs) = self.documents.get(&self.current_container) else {
            return "No documents are indexed in this container.".to_string();
        };
        if docs.is_empty() {
            return "No documents are indexed in this container.".to_string();
        }
        docs.iter()
            .map(|d| format!("{} ({} chunks)", d.filename, d.total_chunks))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn get_document_summary(&self, name: &str) -> String {
        record_tool_call();
        let Some(docs) = self.documents.get(&self.current_container) else {
            return format!("No document matching '{}' was found.", name);
        };
        let needle = name.to_lowercase();
        match docs.iter().find(|d| d.filename.to_lowercase().contains(&needle)) {
            Some(d) => format!("{}: {} chunks indexed.", d.filename, d.total_chunks),
            None => format!("No document matching '{}' was found.", name),
        }
    }
}

#[async_trait]
impl ToolHandler for LiveToolHandler {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: "search_documents".to_string(),
                description: "Search the indexed documents in the active container using semantic search.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "q": {"type": "string", "description": "The search query"},
                        "topK": {"type": "integer", "description": "Number of results to return", "default": 5},
                        "minSim": {"type": "number", "description": "Minimum similarity threshold", "default": 0.0}
                    },
                    "required": ["q"]
                }),
            },
            ToolSchema {
                name: "list_documents".to_string(),
                description: "List all documents indexed in the active container.".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            },
            ToolSchema {
                name: "get_document_summary".to_string(),
                description: "Get a summary for a document matching a (possibly partial) filename.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Document filename or partial filename"}
                    },
                    "required": ["name"]
                }),
            },
        ]
    }

    async fn call(&self, name: &str, arguments_json: &str) -> String {
        let args: serde_json::Value = serde_json::from_str(arguments_json).unwrap_or(serde_json::Value::Null);
        match name {
            "search_documents" => {
                let q = args["q"].as_str().unwrap_or_default();
                let top_k = args["topK"].as_u64().unwrap_or(5) as usize;
                let min_sim = args["minSim"].as_f64().unwrap_or(0.0) as f32;
                self.search_documents(q, top_k.max(1), min_sim)
            }
            "list_documents" => self.list_documents(),
            "get_document_summary" => {
                let doc_name = args["name"].as_str().unwrap_or_default();
                self.get_document_summary(doc_name)
            }
            other => format!("Unknown tool: {}", other),
        }
    }
}
