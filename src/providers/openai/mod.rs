
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use super::http::{HttpTransport, endpoint};
use super::{Embedder, EmbeddingSpace, GenerationOptions, Generator, ProviderKind};
use crate::config::Config;
use crate::{CodeRagError, Result};

/// Client for the hosted OpenAI API
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    transport: HttpTransport,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config.openai.base_url()?;
        let api_key = config.openai.require_api_key()?.to_string();

        Ok(Self {
            base_url,
            api_key,
            embedding_model: config.openai.embedding_model.clone(),
            chat_model: config.openai.chat_model.clone(),
            transport: HttpTransport::new(ProviderKind::OpenAi, config.request_timeout()),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = HttpTransport::new(ProviderKind::OpenAi, timeout);
        self
    }

    /// Embed one text, sent as a single-element batch
    #[inline]
    pub fn create_embedding(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: [text],
        };
        let url = endpoint(&self.base_url, "embeddings")?;

        let response: EmbeddingResponse =
            self.transport
                .post_json(&url, Some(&self.api_key), &request, deadline)?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .unwrap_or_default();

        if embedding.is_empty() {
            warn!("OpenAI returned no embedding for model {}", self.embedding_model);
            return Err(CodeRagError::EmbeddingUnavailable {
                provider: ProviderKind::OpenAi,
            });
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    /// Single-turn chat completion with a system and a user message
    #[inline]
    pub fn create_chat_completion(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };
        let url = endpoint(&self.base_url, "chat/completions")?;

        debug!(
            "Requesting chat completion from {} (prompt length: {})",
            self.chat_model,
            user_prompt.len()
        );

        let response: ChatResponse =
            self.transport
                .post_json(&url, Some(&self.api_key), &request, deadline)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| CodeRagError::ProviderBadResponse {
                provider: ProviderKind::OpenAi,
                message: "response contained no message content".to_string(),
            })
    }
}

impl Embedder for OpenAiClient {
    #[inline]
    fn embed_until(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>> {
        self.create_embedding(text, deadline)
    }

    #[inline]
    fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::OpenAi,
            model: self.embedding_model.clone(),
        }
    }
}

impl Generator for OpenAiClient {
    #[inline]
    fn generate_until(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
        deadline: Option<Instant>,
    ) -> Result<String> {
        self.create_chat_completion(system_prompt, user_prompt, options, deadline)
    }

    #[inline]
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}
