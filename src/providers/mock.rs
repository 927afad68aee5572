//! In-process providers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{Embedder, EmbeddingSpace, GenerationOptions, Generator, ProviderKind};
use crate::{CodeRagError, Result};

/// Embeds text as keyword occurrence counts over a fixed vocabulary, so
/// texts sharing words land close together.
pub(crate) struct KeywordEmbedder {
    vocabulary: Vec<&'static str>,
    model: String,
    pub(crate) calls: Arc<AtomicUsize>,
}

impl KeywordEmbedder {
    pub(crate) fn new(vocabulary: &[&'static str]) -> Self {
        Self {
            vocabulary: vocabulary.to_vec(),
            model: "keyword-test".to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

impl Embedder for KeywordEmbedder {
    fn embed_until(&self, text: &str, _deadline: Option<Instant>) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lowered = text.to_lowercase();
        Ok(self
            .vocabulary
            .iter()
            .map(|word| lowered.matches(word).count() as f32)
            .collect())
    }

    fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::Ollama,
            model: self.model.clone(),
        }
    }
}

/// Always fails the way an unreachable server does.
pub(crate) struct UnreachableEmbedder;

impl Embedder for UnreachableEmbedder {
    fn embed_until(&self, _text: &str, _deadline: Option<Instant>) -> Result<Vec<f32>> {
        Err(CodeRagError::ProviderUnavailable {
            provider: ProviderKind::Ollama,
            message: "connection refused".to_string(),
        })
    }

    fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace {
            provider: ProviderKind::Ollama,
            model: "keyword-test".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedPrompt {
    pub(crate) system_prompt: String,
    pub(crate) user_prompt: String,
    pub(crate) options: GenerationOptions,
}

/// Answers with a canned reply, or fails with HTTP 500 when given none,
/// and records every prompt it receives.
pub(crate) struct RecordingGenerator {
    reply: Option<String>,
    pub(crate) calls: Arc<AtomicUsize>,
    pub(crate) prompts: Arc<Mutex<Vec<RecordedPrompt>>>,
}

impl RecordingGenerator {
    pub(crate) fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            reply: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Generator for RecordingGenerator {
    fn generate_until(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: GenerationOptions,
        _deadline: Option<Instant>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt log lock poisoned")
            .push(RecordedPrompt {
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
                options,
            });
        self.reply
            .clone()
            .ok_or_else(|| CodeRagError::ProviderBadResponse {
                provider: ProviderKind::Ollama,
                message: "HTTP 500".to_string(),
            })
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}
