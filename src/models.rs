use serde::{Deserialize, Serialize};

use crate::loader::clean_source;

/// An uploaded file before it is written into the source directory.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub source: String,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub chunk_index: usize,
}

/// Text extracted from a file, before chunking.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    pub fn source(&self) -> &str {
        &self.metadata.source
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VectorRecord {
    pub embedding: Vec<f32>,
    pub chunk: TextChunk,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: TextChunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<TextChunk>,
}

impl QueryResult {
    pub fn message(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
        }
    }

    /// Source filenames for display: basenames, first occurrence only,
    /// in retrieval order.
    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for chunk in &self.sources {
            let name = clean_source(chunk.source());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
