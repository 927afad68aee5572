use std::time::Duration;

use thiserror::Error;

use crate::providers::ProviderKind;

pub type Result<T> = std::result::Result<T, CodeRagError>;

#[derive(Error, Debug)]
pub enum CodeRagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{provider} is unavailable: {message}")]
    ProviderUnavailable {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} did not answer within {timeout:?}")]
    ProviderTimeout {
        provider: ProviderKind,
        timeout: Duration,
    },

    #[error("{provider} returned a bad response: {message}")]
    ProviderBadResponse {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} returned no embedding for the input")]
    EmbeddingUnavailable { provider: ProviderKind },

    #[error(
        "Embedding dimension mismatch: index holds {expected}-dimensional vectors but got {actual}"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Generation failed: {0}")]
    GenerationFailure(#[source] Box<CodeRagError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CodeRagError {
    /// What the user can do about this error, when there is something to do.
    #[inline]
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => Some(
                "the embedding model changed since the index was built; rebuild it with `coderag index`",
            ),
            Self::IndexUnavailable(_) => Some("build the index with `coderag index`"),
            Self::ProviderUnavailable { .. } | Self::ProviderTimeout { .. } => {
                Some("check that the model server is running and reachable")
            }
            Self::GenerationFailure(inner) => inner.remediation(),
            _ => None,
        }
    }
}

impl From<crate::config::ConfigError> for CodeRagError {
    #[inline]
    fn from(error: crate::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

pub mod commands;
pub mod config;
pub mod index;
pub mod providers;
pub mod rag;
pub mod retriever;
