use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::{EmbeddingBackend, Settings};
use crate::error::{ProviderError, Result};

const OPENAI_BATCH_SIZE: usize = 96;

/// Text to vector. Indexing and querying must go through the same embedder;
/// `model_id` is persisted with the index so a mismatch can be detected.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    async fn embed_query(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Generic("embedding provider returned no vectors".into()))
    }
}

pub fn from_settings(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    match settings.embedding_backend {
        EmbeddingBackend::FastEmbed => Ok(Arc::new(FastEmbedder::new()?)),
        EmbeddingBackend::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(
            &settings.api_base,
            settings.api_key.clone(),
            &settings.embedding_model,
        ))),
    }
}

/// Local embeddings with all-MiniLM-L6-v2; the model is downloaded on first use.
pub struct FastEmbedder {
    model: TextEmbedding,
}

impl FastEmbedder {
    pub const MODEL_ID: &'static str = "fastembed/all-MiniLM-L6-v2";

    pub fn new() -> Result<Self> {
        info!("Loading local embedding model {}", Self::MODEL_ID);
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )
        .map_err(|e| ProviderError::Generic(format!("failed to load embedding model: {e}")))?;
        Ok(Self { model })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }

    async fn embed_documents(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts locally", texts.len());
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| ProviderError::Generic(e.to_string()))
    }
}

/// Hosted embeddings through an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_base: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/embeddings", api_base.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
        }
    }

    async fn embed_batch(&self, api_key: &str, batch: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "embedding request failed");
                ProviderError::from(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(%status, "embedding API error");
            return Err(ProviderError::from_status(status, detail));
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        payload.data.sort_by_key(|d| d.index);
        if payload.data.len() != batch.len() {
            return Err(ProviderError::Generic(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                payload.data.len()
            )));
        }
        Ok(payload.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Deserialize)]
pub(crate) struct ErrorDetail {
    pub message: String,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Authentication("OPENAI_API_KEY is not set".into()))?;

        debug!(model = %self.model, count = texts.len(), "embedding batch");
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(OPENAI_BATCH_SIZE) {
            vectors.extend(self.embed_batch(api_key, batch).await?);
        }
        Ok(vectors)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::HashEmbedder;
    use super::*;

    #[tokio::test]
    async fn test_embed_query_uses_document_path() -> anyhow::Result<()> {
        let embedder = HashEmbedder::new();
        let query = embedder.embed_query("warranty period").await?;
        let docs = embedder
            .embed_documents(&["warranty period".to_string()])
            .await?;
        assert_eq!(query, docs[0]);
        Ok(())
    }

    #[tokio::test]
    async fn test_openai_without_key_is_authentication_error() {
        let embedder = OpenAiEmbedder::new("http://127.0.0.1:9", None, "text-embedding-3-small");
        let result = embedder.embed_documents(&["hello".to_string()]).await;
        assert!(matches!(result, Err(ProviderError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_openai_unreachable_is_connectivity_error() {
        // Port 9 (discard) is closed on test machines, so the connect fails fast.
        let embedder = OpenAiEmbedder::new("http://127.0.0.1:9/v1", Some("sk-test".into()), "m");
        let result = embedder.embed_documents(&["hello".to_string()]).await;
        assert!(matches!(result, Err(ProviderError::Connectivity(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_empty_input_skips_provider() -> anyhow::Result<()> {
        let embedder = OpenAiEmbedder::new("http://127.0.0.1:9", None, "m");
        assert!(embedder.embed_documents(&[]).await?.is_empty());
        Ok(())
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let embedder = OpenAiEmbedder::new("https://api.example.com/v1/", None, "m");
        assert_eq!(embedder.url, "https://api.example.com/v1/embeddings");
        assert_eq!(embedder.model_id(), "m");
    }
}
