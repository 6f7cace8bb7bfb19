use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::embedding::Embedder;
use crate::error::{ProviderError, QaError, Result};
use crate::models::{SearchResult, TextChunk, VectorRecord};

/// Serialized index; its presence is also the "knowledge base exists" marker.
pub const INDEX_FILE: &str = "index.json";
pub const DEFAULT_TOP_K: usize = 4;
const FORMAT_VERSION: u32 = 1;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Append-only embedding index held in memory and persisted as one JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    version: u32,
    embedding_model: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    records: Vec<VectorRecord>,
}

impl VectorIndex {
    pub fn marker_path(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::marker_path(dir).is_file()
    }

    pub async fn create(chunks: Vec<TextChunk>, embedder: &dyn Embedder) -> Result<Self> {
        if chunks.is_empty() {
            return Err(QaError::EmptyInput);
        }
        let records = embed_chunks(chunks, embedder).await?;
        let dimension = records.first().map(|r| r.embedding.len()).unwrap_or_default();
        check_dimensions(&records, dimension, embedder)?;

        let now = Utc::now();
        info!("Created index with {} records (dimension {})", records.len(), dimension);
        Ok(Self {
            version: FORMAT_VERSION,
            embedding_model: embedder.model_id().to_string(),
            dimension,
            created_at: now,
            updated_at: now,
            records,
        })
    }

    pub fn load(dir: &Path, embedder: &dyn Embedder) -> Result<Self> {
        let path = Self::marker_path(dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(QaError::IndexNotFound(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let index: VectorIndex = serde_json::from_str(&raw)?;

        if index.embedding_model != embedder.model_id() {
            return Err(QaError::EmbeddingMismatch {
                indexed: index.embedding_model,
                active: embedder.model_id().to_string(),
            });
        }
        debug!("Loaded index with {} records from {}", index.records.len(), path.display());
        Ok(index)
    }

    /// Embeds and adds `chunks` after the existing records.
    pub async fn append(&mut self, chunks: Vec<TextChunk>, embedder: &dyn Embedder) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        if embedder.model_id() != self.embedding_model {
            return Err(QaError::EmbeddingMismatch {
                indexed: self.embedding_model.clone(),
                active: embedder.model_id().to_string(),
            });
        }
        let records = embed_chunks(chunks, embedder).await?;
        check_dimensions(&records, self.dimension, embedder)?;

        let added = records.len();
        self.records.extend(records);
        self.updated_at = Utc::now();
        info!("Appended {} records, index now holds {}", added, self.records.len());
        Ok(added)
    }

    /// Writes to a temporary file beside the marker and renames it into place.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(Self::marker_path(dir)).map_err(|e| QaError::Io(e.error))?;
        debug!("Saved index with {} records to {}", self.records.len(), dir.display());
        Ok(())
    }

    /// Nearest chunks by cosine similarity; equal scores keep insertion order.
    pub async fn query(&self, text: &str, k: usize, embedder: &dyn Embedder) -> Result<Vec<TextChunk>> {
        Ok(self
            .search(text, k, embedder)
            .await?
            .into_iter()
            .map(|r| r.chunk)
            .collect())
    }

    pub async fn search(&self, text: &str, k: usize, embedder: &dyn Embedder) -> Result<Vec<SearchResult>> {
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = embedder.embed_query(text).await?;

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, record)| (i, cosine_similarity(&record.embedding, &query_embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        for (i, score) in &scored {
            debug!("Match: {} #{} (score {:.4})", self.records[*i].chunk.source(), i, score);
        }

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult {
                chunk: self.records[i].chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct source names in insertion order.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for record in &self.records {
            if !sources.iter().any(|s| s == record.chunk.source()) {
                sources.push(record.chunk.source().to_string());
            }
        }
        sources
    }
}

async fn embed_chunks(chunks: Vec<TextChunk>, embedder: &dyn Embedder) -> Result<Vec<VectorRecord>> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embedder.embed_documents(&texts).await?;
    if embeddings.len() != chunks.len() {
        return Err(ProviderError::Generic(format!(
            "expected {} embeddings, got {}",
            chunks.len(),
            embeddings.len()
        ))
        .into());
    }

    Ok(embeddings
        .into_iter()
        .zip(chunks)
        .map(|(embedding, chunk)| VectorRecord { embedding, chunk })
        .collect())
}

fn check_dimensions(records: &[VectorRecord], dimension: usize, embedder: &dyn Embedder) -> Result<()> {
    match records.iter().find(|r| r.embedding.len() != dimension) {
        Some(bad) => Err(QaError::EmbeddingMismatch {
            indexed: format!("{dimension} dimensions"),
            active: format!("{} ({} dimensions)", embedder.model_id(), bad.embedding.len()),
        }),
        None => Ok(()),
    }
}
