//! C2 — Vector Index.
//!
//! Grounded on `storage/lance_store.rs`'s method shape
//! (`insert`/`search`/`delete_by_*`/`clear`/`count`) and cosine-distance
//! convention, replacing the LanceDB backend with an in-process linear scan
//! guarded by a single-writer/many-reader lock (`parking_lot::RwLock`,
//! matching the base crate's concurrency idiom in `rag_engine.rs`).

use crate::error::EngineError;
use crate::types::{vector_norm, Chunk, RetrievedChunk};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

const CACHE_CAPACITY: usize = 20;
const CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_HIT_SIMILARITY: f32 = 0.95;

struct CachedQuery {
    query_vec: Vec<f32>,
    results: Vec<RetrievedChunk>,
    inserted_at: Instant,
}

struct Inner {
    chunks: HashMap<Uuid, (Chunk, usize)>, // chunk -> (chunk, insertion_order)
    next_order: usize,
    cache: Vec<CachedQuery>,
}

/// In-memory, single-container vector index. Many readers may `search`
/// concurrently; `insert`/`delete_by_document`/`clear` take the writer lock
/// exclusively so readers never observe a torn (half-inserted) state.
pub struct VectorIndex {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner {
                chunks: HashMap::new(),
                next_order: 0,
                cache: Vec::new(),
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn insert(&self, chunk: Chunk) -> Result<(), EngineError> {
        chunk.validate(self.dimension)?;
        let mut inner = self.inner.write();
        let order = inner.next_order;
        inner.next_order += 1;
        inner.chunks.insert(chunk.id, (chunk, order));
        inner.cache.clear();
        Ok(())
    }

    pub fn insert_batch(&self, chunks: Vec<Chunk>) -> Result<(), EngineError> {
        for c in &chunks {
            c.validate(self.dimension)?;
        }
        let mut inner = self.inner.write();
        for chunk in chunks {
            let order = inner.next_order;
            inner.next_order += 1;
            inner.chunks.insert(chunk.id, (chunk, order));
        }
        inner.cache.clear();
        Ok(())
    }

    /// Top-k by cosine similarity, rank-assigned 1-based in descending order,
    /// ties broken by insertion order. Returns `N` items (not an error) when
    /// `k > N`; returns `[]` on an empty index.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, EngineError> {
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        // Cache lookup under a read lock first; promote to write only on a hit
        // (to move the entry to front) or a full miss (to insert the result).
        {
            let inner = self.inner.read();
            if let Some(hit) = Self::cache_lookup(&inner.cache, query, k) {
                drop(inner);
                let mut inner = self.inner.write();
                Self::promote_cache_entry(&mut inner.cache, query);
                return Ok(hit);
            }
        }

        let query_norm = vector_norm(query);
        let results = {
            let inner = self.inner.read();
            let mut scored: Vec<(f32, usize, &Chunk)> = inner
                .chunks
                .values()
                .map(|(chunk, order)| {
                    let sim = cosine_similarity(query, &chunk.embedding, query_norm);
                    (sim, *order, chunk)
                })
                .collect();

            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });

            scored
                .into_iter()
                .take(k)
                .enumerate()
                .map(|(i, (sim, _, chunk))| RetrievedChunk {
                    chunk: chunk.clone(),
                    similarity: sim,
                    rank: i + 1,
                    source_document: None,
                    page_number: chunk.metadata.page_number,
                })
                .collect::<Vec<_>>()
        };

        let mut inner = self.inner.write();
        Self::cache_insert(&mut inner.cache, query.to_vec(), results.clone());
        Ok(results)
    }

    pub fn delete_by_document(&self, document_id: Uuid) -> usize {
        let mut inner = self.inner.write();
        let before = inner.chunks.len();
        inner.chunks.retain(|_, (c, _)| c.document_id != document_id);
        inner.cache.clear();
        before - inner.chunks.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.chunks.clear();
        inner.cache.clear();
    }

    pub fn count(&self) -> usize {
        self.inner.read().chunks.len()
    }

    pub fn all(&self) -> Vec<Chunk> {
        self.inner.read().chunks.values().map(|(c, _)| c.clone()).collect()
    }

    fn cache_lookup(
        cache: &[CachedQuery],
        query: &[f32],
        k: usize,
    ) -> Option<Vec<RetrievedChunk>> {
        let now = Instant::now();
        let query_norm = vector_norm(query);
        for entry in cache {
            if now.duration_since(entry.inserted_at) > CACHE_TTL {
                continue;
            }
            let sim = cosine_similarity(query, &entry.query_vec, query_norm);
            if sim > CACHE_HIT_SIMILARITY {
                return Some(entry.results.iter().take(k).cloned().collect());
            }
        }
        None
    }

    fn promote_cache_entry(cache: &mut Vec<CachedQuery>, query: &[f32]) {
        let query_norm = vector_norm(query);
        if let Some(pos) = cache
            .iter()
            .position(|e| cosine_similarity(query, &e.query_vec, query_norm) > CACHE_HIT_SIMILARITY)
        {
            let entry = cache.remove(pos);
            cache.insert(0, entry);
        }
    }

    fn cache_insert(cache: &mut Vec<CachedQuery>, query_vec: Vec<f32>, results: Vec<RetrievedChunk>) {
        let now = Instant::now();
        cache.retain(|e| now.duration_since(e.inserted_at) <= CACHE_TTL);
        cache.insert(
            0,
            CachedQuery {
                query_vec,
                results,
                inserted_at: now,
            },
        );
        while cache.len() > CACHE_CAPACITY {
            cache.pop();
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32) -> f32 {
    let b_norm = vector_norm(b);
    if a_norm < 1e-9 || b_norm < 1e-9 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (dot / (a_norm * b_norm)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn unit_chunk(id: Uuid, doc: Uuid, v: Vec<f32>, content: &str) -> Chunk {
        let norm = vector_norm(&v);
        let v = v.into_iter().map(|x| x / norm).collect();
        Chunk {
            id,
            document_id: doc,
            content: content.to_string(),
            embedding: v,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn insert_then_search_self_hit() {
        let idx = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        let id = Uuid::new_v4();
        let c = unit_chunk(id, doc, vec![1.0, 0.0, 0.0, 0.0], "hello");
        idx.insert(c.clone()).unwrap();
        let results = idx.search(&c.embedding, 1).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].similarity >= 0.999);
        assert_eq!(results[0].chunk.id, id);
        assert_eq!(results[0].rank, 1);
    }

    #[test]
    fn empty_index_returns_empty() {
        let idx = VectorIndex::new(4);
        let results = idx.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn k_greater_than_n_returns_n() {
        let idx = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        for i in 0..3 {
            idx.insert(unit_chunk(Uuid::new_v4(), doc, vec![1.0, i as f32 * 0.01, 0.0, 0.0], "x"))
                .unwrap();
        }
        let results = idx.search(&[1.0, 0.0, 0.0, 0.0], 100).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn dimension_mismatch_errors() {
        let idx = VectorIndex::new(4);
        let err = idx.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[test]
    fn delete_by_document_removes_all_its_chunks() {
        let idx = VectorIndex::new(4);
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        idx.insert(unit_chunk(Uuid::new_v4(), doc_a, vec![1.0, 0.0, 0.0, 0.0], "a1"))
            .unwrap();
        idx.insert(unit_chunk(Uuid::new_v4(), doc_a, vec![0.0, 1.0, 0.0, 0.0], "a2"))
            .unwrap();
        idx.insert(unit_chunk(Uuid::new_v4(), doc_b, vec![0.0, 0.0, 1.0, 0.0], "b1"))
            .unwrap();
        let initial_count = idx.count();
        idx.delete_by_document(doc_a);
        let results = idx.search(&[1.0, 0.0, 0.0, 0.0], 10).unwrap();
        assert!(results.iter().all(|r| r.chunk.document_id != doc_a));
        assert_eq!(idx.count(), initial_count - 2);
    }

    #[test]
    fn insert_batch_then_delete_restores_count() {
        let idx = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        let batch: Vec<Chunk> = (0..5)
            .map(|i| unit_chunk(Uuid::new_v4(), doc, vec![1.0, i as f32 * 0.1, 0.0, 0.0], "x"))
            .collect();
        idx.insert_batch(batch).unwrap();
        assert_eq!(idx.count(), 5);
        idx.delete_by_document(doc);
        assert_eq!(idx.count(), 0);
    }

    #[test]
    fn query_cache_hit_returns_same_results() {
        let idx = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        idx.insert(unit_chunk(Uuid::new_v4(), doc, vec![1.0, 0.0, 0.0, 0.0], "a"))
            .unwrap();
        let q = vec![1.0f32, 0.0, 0.0, 0.0];
        let first = idx.search(&q, 1).unwrap();
        let second = idx.search(&q, 1).unwrap();
        assert_eq!(first[0].chunk.id, second[0].chunk.id);
    }

    #[test]
    fn any_write_flushes_cache() {
        let idx = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        idx.insert(unit_chunk(Uuid::new_v4(), doc, vec![1.0, 0.0, 0.0, 0.0], "a"))
            .unwrap();
        idx.search(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        idx.insert(unit_chunk(Uuid::new_v4(), doc, vec![0.0, 1.0, 0.0, 0.0], "b"))
            .unwrap();
        assert_eq!(idx.inner.read().cache.len(), 0);
    }
}
