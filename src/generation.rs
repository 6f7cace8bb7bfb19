use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Settings;
use crate::embedding::ErrorResponse;
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Prompt in, completion text out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

pub fn from_settings(settings: &Settings) -> Arc<dyn Generator> {
    Arc::new(OpenAiChat::new(
        &settings.api_base,
        settings.api_key.clone(),
        &settings.chat_model,
        settings.temperature,
    ))
}

/// Chat completions against an OpenAI-compatible endpoint.
pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(api_base: &str, api_key: Option<String>, model: &str, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiChat {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Authentication("OPENAI_API_KEY is not set".into()))?;

        debug!(model = %self.model, messages = messages.len(), "requesting completion");
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "chat request failed");
                ProviderError::from(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!(%status, "chat API error");
            return Err(ProviderError::from_status(status, detail));
        }

        let payload: ChatResponse = response.json().await?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Generic("model returned an empty completion".into()))
    }
}
