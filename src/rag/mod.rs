// RAG orchestration
// Retrieval, prompt assembly and a single generation call per question

pub mod prompts;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::index::SearchHit;
use crate::providers::{GenerationOptions, Generator};
use crate::retriever::Retriever;
use crate::{CodeRagError, Result};

pub use prompts::SYSTEM_PROMPT;

/// Returned instead of a generated answer when nothing relevant is indexed
pub const NO_CONTEXT_MESSAGE: &str = "No relevant code found for your query.";

/// How many fragments to retrieve and how to sample the answer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationPolicy {
    pub top_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 3,
            temperature: 0.3,
            max_tokens: 4000,
        }
    }
}

impl GenerationPolicy {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        }
    }

    fn options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// A generated answer and the fragments it was grounded on
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchHit>,
}

impl Answer {
    fn without_context() -> Self {
        Self {
            text: NO_CONTEXT_MESSAGE.to_string(),
            sources: Vec::new(),
        }
    }
}

/// Answers questions about the indexed code
pub struct RagOrchestrator {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    policy: GenerationPolicy,
}

impl RagOrchestrator {
    #[inline]
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            generator,
            policy: GenerationPolicy::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: GenerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `query`. Never fails: errors come back as text starting with
    /// `Error: `, followed by a hint when there is something to do about it.
    #[inline]
    pub fn answer(&self, query: &str) -> String {
        self.answer_until(query, None)
    }

    /// [`answer`](Self::answer) bounded by a deadline on every provider call
    #[inline]
    pub fn answer_until(&self, query: &str, deadline: Option<Instant>) -> String {
        match self.try_answer_until(query, deadline) {
            Ok(answer) => answer.text,
            Err(error) => {
                warn!("Failed to answer query: {}", error);
                render_error(&error)
            }
        }
    }

    /// # Errors
    ///
    /// Retrieval errors are returned as they are. A failure of the
    /// generation call is wrapped in [`CodeRagError::GenerationFailure`].
    #[inline]
    pub fn try_answer(&self, query: &str) -> Result<Answer> {
        self.try_answer_until(query, None)
    }

    #[inline]
    pub fn try_answer_until(&self, query: &str, deadline: Option<Instant>) -> Result<Answer> {
        let hits = self
            .retriever
            .retrieve_until(query, self.policy.top_k, deadline)?;
        if hits.is_empty() {
            info!("No indexed code matched the query");
            return Ok(Answer::without_context());
        }

        let context = prompts::format_context(&hits);
        let user_prompt = prompts::build_user_prompt(query, &context);
        debug!(
            "Generating with {} ({} fragments, {} prompt chars)",
            self.generator.kind(),
            hits.len(),
            user_prompt.len()
        );

        let text = self
            .generator
            .generate_until(SYSTEM_PROMPT, &user_prompt, self.policy.options(), deadline)
            .map_err(|error| CodeRagError::GenerationFailure(Box::new(error)))?;

        Ok(Answer {
            text,
            sources: hits,
        })
    }
}

/// User-facing form of an error
#[inline]
pub fn render_error(error: &CodeRagError) -> String {
    match error.remediation() {
        Some(hint) => format!("Error: {error}\nHint: {hint}"),
        None => format!("Error: {error}"),
    }
}
