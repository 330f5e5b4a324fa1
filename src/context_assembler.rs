//! C8 — Context Assembler.
//!
//! Grounded on `llm/mod.rs::format_rag_prompt`'s `[Document N]`-tagged
//! block-building style, reshaped to this engine's exact header format and
//! char-budget truncation rule.

use crate::types::RetrievedChunk;

/// Build the citation-tagged context block, stopping once the next block
/// would exceed `max_chars` (but always including at least one chunk when
/// the input is non-empty). Returns `(assembled_text, chunks_used)`.
pub fn assemble(chunks: &[RetrievedChunk], max_chars: usize) -> (String, usize) {
    if chunks.is_empty() {
        return (String::new(), 0);
    }

    let mut out = String::new();
    let mut used = 0;

    for (i, chunk) in chunks.iter().enumerate() {
        let is_last = i == chunks.len() - 1;
        let mut block = format!(
            "[Document Chunk {}, Similarity: {:.3}]\n{}\n\n",
            i + 1,
            chunk.similarity,
            chunk.chunk.content
        );
        if !is_last {
            block.push_str("---\n\n");
        }

        if used > 0 && out.len() + block.len() > max_chars {
            break;
        }

        out.push_str(&block);
        used += 1;
    }

    // If we stopped before the last chunk we included, the trailing
    // separator it carried is spurious — it was only omitted for the
    // actual final input chunk above.
    if used < chunks.len() && out.ends_with("---\n\n") {
        out.truncate(out.len() - "---\n\n".len());
    }

    (out, used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkMetadata};
    use uuid::Uuid;

    fn chunk(content: &str, similarity: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: Uuid::new_v4(),
                document_id: Uuid::new_v4(),
                content: content.to_string(),
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
    fn includes_exactly_chunks_used_headers() {
        let chunks = vec![chunk("a", 0.9), chunk("b", 0.8), chunk("c", 0.7)];
        let (text, used) = assemble(&chunks, 10_000);
        assert_eq!(used, 3);
        assert_eq!(text.matches("Document Chunk").count(), 3);
    }

    #[test]
    fn always_includes_at_least_one_chunk() {
        let chunks = vec![chunk(&"x".repeat(1000), 0.9)];
        let (text, used) = assemble(&chunks, 10);
        assert_eq!(used, 1);
        assert!(!text.is_empty());
    }

    #[test]
    fn stops_before_exceeding_budget() {
        let chunks: Vec<_> = (0..10).map(|i| chunk(&"word ".repeat(50), 0.9 - i as f32 * 0.01)).collect();
        let (text, used) = assemble(&chunks, 500);
        assert!(used < chunks.len());
        assert!(text.len() <= 500 + 300); // allow one block's worth of slack from the stop rule
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let (text, used) = assemble(&[], 1000);
        assert_eq!(used, 0);
        assert!(text.is_empty());
    }

    #[test]
    fn final_separator_omitted_on_last_chunk() {
        let chunks = vec![chunk("a", 0.9), chunk("b", 0.8)];
        let (text, _) = assemble(&chunks, 10_000);
        assert!(text.trim_end().ends_with('b'));
    }
}
