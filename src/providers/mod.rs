// Provider gateways
// Embedding and generation backends behind two capability traits

pub(crate) mod http;
pub mod ollama;
pub mod openai;

#[cfg(test)]
pub(crate) mod mock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::Result;

pub use ollama::{ModelInfo, OllamaClient};
pub use openai::OpenAiClient;

/// The two interchangeable backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local model server
    Ollama,
    /// Hosted API
    OpenAi,
}

impl ProviderKind {
    /// Resolve a configuration selector. Matching is case-insensitive and
    /// anything that is not the local server selects the hosted API.
    #[inline]
    pub fn from_selector(selector: &str) -> Self {
        if selector.trim().eq_ignore_ascii_case("ollama") {
            Self::Ollama
        } else {
            Self::OpenAi
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ollama => "Ollama",
            Self::OpenAi => "OpenAI",
        })
    }
}

/// Identity of the model that produced a set of vectors. Vectors from
/// different spaces are not comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub provider: ProviderKind,
    pub model: String,
}

impl fmt::Display for EmbeddingSpace {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.as_str(), self.model)
    }
}

/// Sampling parameters passed through to the generation backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Turns text into an embedding vector.
pub trait Embedder: Send + Sync {
    /// Embed `text`, giving up once `deadline` has passed.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the backend cannot be reached, times
    /// out, answers with a non-success status or malformed body, or returns
    /// no embedding. A zero-length vector is never returned.
    fn embed_until(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>>;

    fn space(&self) -> EmbeddingSpace;

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_until(text, None)
    }
}

/// Produces a one-shot completion from a system and a user prompt.
pub trait Generator: Send + Sync {
    /// # Errors
    ///
    /// Returns a provider error when the backend cannot be reached, times
    /// out, or answers with a non-success status or malformed body.
    fn generate_until(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
        deadline: Option<Instant>,
    ) -> Result<String>;

    fn kind(&self) -> ProviderKind;

    #[inline]
    fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        self.generate_until(
            system_prompt,
            user_prompt,
            GenerationOptions {
                temperature,
                max_tokens,
            },
            None,
        )
    }
}

/// Build the embedding backend named by `providers.embedding`
#[inline]
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let kind = ProviderKind::from_selector(&config.providers.embedding);
    info!("Using {} for embeddings", kind);
    let backend: Arc<dyn Embedder> = match kind {
        ProviderKind::Ollama => Arc::new(OllamaClient::new(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(config)?),
    };
    Ok(backend)
}

/// Build the generation backend named by `providers.generation`
#[inline]
pub fn build_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let kind = ProviderKind::from_selector(&config.providers.generation);
    info!("Using {} for generation", kind);
    let backend: Arc<dyn Generator> = match kind {
        ProviderKind::Ollama => Arc::new(OllamaClient::new(config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(config)?),
    };
    Ok(backend)
}

/// The embedding space the configured embedder will produce, without
/// building a client.
#[inline]
pub fn configured_space(config: &Config) -> EmbeddingSpace {
    let provider = ProviderKind::from_selector(&config.providers.embedding);
    let model = match provider {
        ProviderKind::Ollama => config.ollama.embedding_model.clone(),
        ProviderKind::OpenAi => config.openai.embedding_model.clone(),
    };
    EmbeddingSpace { provider, model }
}
