use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::embedding::Embedder;
use crate::error::{ProviderError, QaError, Result};
use crate::generation::{ChatMessage, Generator};
use crate::index::{VectorIndex, DEFAULT_TOP_K};
use crate::models::{QueryResult, TextChunk};

pub const CONNECTIVITY_MESSAGE: &str =
    "[Connection error] Unable to reach the model provider. Please check your network.";
pub const AUTHENTICATION_MESSAGE: &str =
    "[Authentication error] The API key was rejected. Please check your configuration.";
pub const MISSING_INDEX_MESSAGE: &str =
    "[Knowledge base missing] No knowledge base found. Upload documents or run a rebuild first.";
pub const EMPTY_QUESTION_MESSAGE: &str = "Please enter a question.";
const GENERIC_PREFIX: &str = "[Provider error]";

const SYSTEM_PROMPT: &str = "You answer questions about internal documents. \
Use only the context below. If the answer is not in the context, say that you don't know.";

pub struct AnswerEngine {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    top_k: usize,
}

impl AnswerEngine {
    pub fn new(embedder: Arc<dyn Embedder>, generator: Arc<dyn Generator>) -> Self {
        Self {
            embedder,
            generator,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Loads the persisted index and answers against it. Never fails: every
    /// error becomes a message with no sources.
    pub async fn ask(&self, question: &str, index_dir: &Path) -> QueryResult {
        if question.trim().is_empty() {
            return QueryResult::message(EMPTY_QUESTION_MESSAGE);
        }
        match VectorIndex::load(index_dir, self.embedder.as_ref()) {
            Ok(index) => self.answer(question, &index).await,
            Err(err) => {
                warn!("Cannot answer without a knowledge base: {}", err);
                QueryResult::message(failure_message(&err))
            }
        }
    }

    pub async fn answer(&self, question: &str, index: &VectorIndex) -> QueryResult {
        if question.trim().is_empty() {
            return QueryResult::message(EMPTY_QUESTION_MESSAGE);
        }
        match self.try_answer(question, index).await {
            Ok(result) => result,
            Err(err) => {
                error!("Answer generation failed: {}", err);
                QueryResult::message(failure_message(&err))
            }
        }
    }

    async fn try_answer(&self, question: &str, index: &VectorIndex) -> Result<QueryResult> {
        let chunks = index.query(question, self.top_k, self.embedder.as_ref()).await?;
        info!("Retrieved {} chunks for question", chunks.len());

        let messages = build_prompt(question, &chunks);
        let answer = self.generator.generate(&messages).await?;
        Ok(QueryResult {
            answer,
            sources: chunks,
        })
    }
}

pub fn build_prompt(question: &str, chunks: &[TextChunk]) -> Vec<ChatMessage> {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] (source: {})\n{}", i + 1, chunk.source(), chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Context:\n{context}\n\nQuestion: {}", question.trim())),
    ]
}

pub fn failure_message(err: &QaError) -> String {
    match err {
        QaError::Provider(ProviderError::Connectivity(_)) => CONNECTIVITY_MESSAGE.to_string(),
        QaError::Provider(ProviderError::Authentication(_)) => AUTHENTICATION_MESSAGE.to_string(),
        QaError::Provider(ProviderError::Generic(detail)) => format!("{GENERIC_PREFIX} {detail}"),
        QaError::IndexNotFound(_) => MISSING_INDEX_MESSAGE.to_string(),
        other => format!("{GENERIC_PREFIX} {other}"),
    }
}
