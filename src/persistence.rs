//! Persisted state layout.
//!
//! Grounded on `embeddings/download.rs`'s write-to-temp-then-rename
//! durability convention (the teacher applies it to model downloads; here it
//! guards chunk/document records instead of a JSON store backed by
//! LanceDB/Tantivy as the teacher's `storage/lance_store.rs` does).

use crate::types::{Chunk, Container, Document};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContainerRecord {
    pub container: Option<Container>,
    pub documents: Vec<Document>,
    pub chunks: Vec<Chunk>,
    pub saved_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct PersistenceStore {
    data_dir: PathBuf,
}

impl PersistenceStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn container_path(&self, container_id: Uuid) -> PathBuf {
        self.data_dir.join(format!("container-{}.json", container_id))
    }

    /// Atomically persist one container's full record: serialize, write to a
    /// sibling temp file, then rename over the destination so readers never
    /// observe a half-written file.
    pub async fn save_container(&self, container_id: Uuid, record: &ContainerRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .context("Failed to create data directory")?;

        let dest = self.container_path(container_id);
        let tmp_dest = dest.with_extension("json.tmp");

        let mut record = record.clone();
        record.saved_at = Some(chrono::Utc::now());

        let json = serde_json::to_vec_pretty(&record).context("Failed to serialize container record")?;
        tokio::fs::write(&tmp_dest, &json)
            .await
            .with_context(|| format!("Failed to write temp file for container {}", container_id))?;

        tokio::fs::rename(&tmp_dest, &dest)
            .await
            .with_context(|| format!("Failed to finalize container record for {}", container_id))?;

        tracing::info!(container_id = %container_id, chunks = record.chunks.len(), "Container record persisted");
        Ok(())
    }

    pub async fn load_container(&self, container_id: Uuid) -> Result<Option<ContainerRecord>> {
        let path = self.container_path(container_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read container record {}", container_id))?;
        let record: ContainerRecord =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse container record {}", container_id))?;
        Ok(Some(record))
    }

    pub async fn delete_container(&self, container_id: Uuid) -> Result<()> {
        let path = self.container_path(container_id);
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to delete container record {}", container_id))?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
