
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::http::{HttpTransport, endpoint};
use super::{Embedder, EmbeddingSpace, GenerationOptions, Generator, ProviderKind};
use crate::config::Config;
use crate::{CodeRagError, Result};

/// Client for a local Ollama server, serving both embeddings and generation
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    chat_model: String,
    transport: HttpTransport,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config.ollama.base_url()?;

        Ok(Self {
            base_url,
            embedding_model: config.ollama.embedding_model.clone(),
            chat_model: config.ollama.chat_model.clone(),
            transport: HttpTransport::new(ProviderKind::Ollama, config.request_timeout()),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = HttpTransport::new(ProviderKind::Ollama, timeout);
        self
    }

    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    #[inline]
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Test connection to the Ollama server and verify both configured
    /// models are installed
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models()?;
        for model in [&self.embedding_model, &self.chat_model] {
            ensure_model_available(&models, model)?;
        }

        info!(
            "Health check passed for Ollama server at {} (embedding: {}, chat: {})",
            self.base_url, self.embedding_model, self.chat_model
        );
        Ok(())
    }

    /// List all models installed on the server
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = endpoint(&self.base_url, "api/tags")?;
        debug!("Fetching available models from {}", url);

        let models_response: ModelsResponse = self.transport.get_json(&url, None)?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate an embedding for a single text input
    #[inline]
    pub fn generate_embedding(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.embedding_model,
            prompt: text,
        };
        let url = endpoint(&self.base_url, "api/embeddings")?;

        let response: EmbedResponse = self.transport.post_json(&url, None, &request, deadline)?;

        if response.embedding.is_empty() {
            warn!("Ollama returned no embedding for model {}", self.embedding_model);
            return Err(CodeRagError::EmbeddingUnavailable {
                provider: ProviderKind::Ollama,
            });
        }

        debug!(
            "Generated embedding with {} dimensions",
            response.embedding.len()
        );
        Ok(response.embedding)
    }

    /// Single non-streaming completion; the system prompt is prepended to
    /// the user prompt since the endpoint takes one prompt field
    #[inline]
    pub fn generate_completion(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
        deadline: Option<Instant>,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: &self.chat_model,
            prompt: format!("{system_prompt}\n\n{user_prompt}"),
            stream: false,
            options: GenerateOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        let url = endpoint(&self.base_url, "api/generate")?;

        debug!(
            "Requesting completion from {} (prompt length: {})",
            self.chat_model,
            request.prompt.len()
        );

        let response: GenerateResponse =
            self.transport.post_json(&url, None, &request, deadline)?;

        Ok(response.response.trim().to_string())
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed_until(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>> {
        self.generate_embedding(text, deadline)
    }

    #[inline]
    fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::Ollama,
            model: self.embedding_model.clone(),
        }
    }
}

impl Generator for OllamaClient {
    #[inline]
    fn generate_until(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
        deadline: Option<Instant>,
    ) -> Result<String> {
        self.generate_completion(system_prompt, user_prompt, options, deadline)
    }

    #[inline]
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}

/// Ollama reports untagged models with a `:latest` suffix
fn ensure_model_available(models: &[ModelInfo], model: &str) -> Result<()> {
    let tagged = format!("{model}:latest");
    if models.iter().any(|m| m.name == model || m.name == tagged) {
        debug!("Model {} is available", model);
        return Ok(());
    }

    let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    warn!(
        "Model {} not found. Available models: {:?}",
        model, available_models
    );
    Err(CodeRagError::Config(format!(
        "Model '{model}' is not available. Available models: {available_models:?}"
    )))
}
