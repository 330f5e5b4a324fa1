//! Ingestion (SPEC_FULL.md supplemental feature).
//!
//! Produces the `Chunk`s the engine consumes from already-extracted plain
//! text — no PDF/OCR parsing, which is out of scope for this engine. Windowing
//! is grounded on `processing/chunker.rs::TextChunker::chunk`
//! (paragraph/sentence/line/word break-point priority, char-boundary
//! snapping), narrowed to drop the document-level-context-prefix variant
//! (`ContextualChunkResult`) that has no counterpart here.

use crate::embedding::EmbeddingProvider;
use crate::types::{Chunk, ChunkMetadata, Document};
use uuid::Uuid;

pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 150,
            min_chunk_size: 40,
        }
    }
}

fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

fn find_break_point(text: &str, start: usize, preferred_end: usize) -> usize {
    let raw_search_start = if preferred_end > 200 { preferred_end - 200 } else { start };
    let search_start = snap_to_char_boundary(text, raw_search_start);
    let safe_end = snap_to_char_boundary(text, preferred_end);

    if search_start >= safe_end {
        return safe_end;
    }

    let search_region = &text[search_start..safe_end];
    if let Some(pos) = search_region.rfind("\n\n") {
        return search_start + pos + 2;
    }
    if let Some(pos) = search_region.rfind(". ") {
        return search_start + pos + 2;
    }
    if let Some(pos) = search_region.rfind(".\n") {
        return search_start + pos + 2;
    }
    if let Some(pos) = search_region.rfind('\n') {
        return search_start + pos + 1;
    }
    if let Some(pos) = search_region.rfind(' ') {
        return search_start + pos + 1;
    }
    safe_end
}

struct Window {
    text: String,
    index: usize,
    start: usize,
    end: usize,
    heading: Option<String>,
}

fn window_text(text: &str, cfg: &ChunkerConfig) -> Vec<Window> {
    if text.len() <= cfg.chunk_size {
        if text.len() < cfg.min_chunk_size {
            return Vec::new();
        }
        return vec![Window {
            text: text.to_string(),
            index: 0,
            start: 0,
            end: text.len(),
            heading: extract_heading(text),
        }];
    }

    let mut windows = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while start < text.len() {
        let raw_end = (start + cfg.chunk_size).min(text.len());
        let end = snap_to_char_boundary(text, raw_end);
        let actual_end = if end < text.len() { find_break_point(text, start, end) } else { end };

        let chunk_text = &text[start..actual_end];
        if chunk_text.len() >= cfg.min_chunk_size {
            windows.push(Window {
                text: chunk_text.to_string(),
                index,
                start,
                end: actual_end,
                heading: extract_heading(chunk_text),
            });
            index += 1;
        }

        let step = if actual_end > start && actual_end - start > cfg.chunk_overlap {
            actual_end - start - cfg.chunk_overlap
        } else {
            actual_end.saturating_sub(start).max(1)
        };
        let raw_next = start + step;
        start = snap_to_char_boundary(text, raw_next);
        if start >= text.len() {
            break;
        }
    }

    windows
}

fn extract_heading(text: &str) -> Option<String> {
    let first_line = text.lines().next()?;
    if first_line.starts_with('#') {
        Some(first_line.trim_start_matches('#').trim().to_string())
    } else {
        None
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "with", "this", "that", "from", "have",
    "was", "were", "has", "had", "will", "would", "can", "could", "should",
];

fn top_keywords(text: &str, max_n: usize) -> Vec<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for word in text.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
        if cleaned.len() > 3 && !STOPWORDS.contains(&cleaned.as_str()) {
            *counts.entry(cleaned).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(max_n).map(|(w, _)| w).collect()
}

fn semantic_density(text: &str) -> f32 {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let unique: std::collections::HashSet<String> =
        words.iter().map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()).collect();
    (unique.len() as f32 / words.len() as f32).clamp(0.0, 1.0)
}

fn has_list_markers(text: &str) -> bool {
    text.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("- ") || t.starts_with("* ") || t.starts_with(|c: char| c.is_ascii_digit())
    })
}

/// Split `text` into windowed `Chunk`s and embed each, populating
/// `ChunkMetadata` fields along the way. Returns chunks in document order.
pub fn ingest_document(
    document_id: Uuid,
    text: &str,
    cfg: &ChunkerConfig,
    embedder: &dyn EmbeddingProvider,
) -> Result<Vec<Chunk>, crate::error::EngineError> {
    let windows = window_text(text, cfg);
    let mut chunks = Vec::with_capacity(windows.len());

    for w in windows {
        let embedding = embedder.embed(&w.text)?;
        let word_count = w.text.split_whitespace().count();
        chunks.push(Chunk {
            id: Uuid::new_v4(),
            document_id,
            content: w.text.clone(),
            embedding,
            metadata: ChunkMetadata {
                chunk_index: w.index,
                start_position: w.start,
                end_position: w.end,
                page_number: None,
                section_title: w.heading,
                word_count,
                top_keywords: top_keywords(&w.text, 5),
                semantic_density: semantic_density(&w.text),
                has_numeric: w.text.chars().any(|c| c.is_ascii_digit()),
                has_list: has_list_markers(&w.text),
            },
        });
    }

    Ok(chunks)
}

pub fn document_from_chunks(id: Uuid, filename: impl Into<String>, container_id: Uuid, chunks: &[Chunk]) -> Document {
    Document {
        id,
        filename: filename.into(),
        container_id,
        total_chunks: chunks.len(),
        processing_metadata: None,
    }
}
