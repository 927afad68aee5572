// Retriever module
// Embeds a query and looks it up in the current index snapshot


use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::index::{SearchHit, SharedIndex};
use crate::providers::Embedder;
use crate::{CodeRagError, Result};

/// Semantic code retriever over a [`SharedIndex`]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<SharedIndex>,
    min_similarity: Option<f32>,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<SharedIndex>) -> Self {
        Self {
            embedder,
            index,
            min_similarity: None,
        }
    }

    /// Drop hits scoring below `floor`
    #[inline]
    #[must_use]
    pub fn with_min_similarity(mut self, floor: Option<f32>) -> Self {
        self.min_similarity = floor;
        self
    }

    #[inline]
    pub fn from_config(
        embedder: Arc<dyn Embedder>,
        index: Arc<SharedIndex>,
        config: &RetrievalConfig,
    ) -> Self {
        Self::new(embedder, index).with_min_similarity(config.min_similarity)
    }

    /// The `k` fragments most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// Propagates embedding failures, and fails with
    /// [`CodeRagError::DimensionMismatch`] when the embedder now produces
    /// vectors of another length than the index holds.
    #[inline]
    pub fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.retrieve_until(query, k, None)
    }

    /// [`retrieve`](Self::retrieve) bounded by a deadline on the embedding call
    #[inline]
    pub fn retrieve_until(
        &self,
        query: &str,
        k: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<SearchHit>> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() || k == 0 {
            debug!("Nothing to retrieve (index holds {} entries)", snapshot.len());
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_until(query, deadline)?;
        if let Some(expected) = snapshot.dimension().filter(|d| *d != vector.len()) {
            return Err(CodeRagError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let mut hits = snapshot.search(&vector, k)?;
        if let Some(floor) = self.min_similarity {
            hits.retain(|hit| hit.score >= floor);
        }

        debug!(
            "Retrieved {} fragments for query ({} chars)",
            hits.len(),
            query.len()
        );
        Ok(hits)
    }
}
