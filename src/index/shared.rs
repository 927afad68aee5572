use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use super::{RebuildStats, ScanOptions, VectorIndex};
use crate::Result;
use crate::providers::{Embedder, EmbeddingSpace};

/// Holds the current index behind a swappable snapshot.
///
/// Readers take an `Arc` to the index as it was when they asked and keep
/// using it for as long as they like. A rebuild works on a separate index
/// and only takes the write lock to swap the pointer, so queries never wait
/// on embedding calls and never see a half-built index.
#[derive(Debug)]
pub struct SharedIndex {
    current: RwLock<Arc<VectorIndex>>,
}

impl SharedIndex {
    #[inline]
    pub fn new(index: VectorIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    #[inline]
    pub fn empty(space: EmbeddingSpace) -> Self {
        Self::new(VectorIndex::new(space))
    }

    /// The index as of now
    #[inline]
    pub fn snapshot(&self) -> Arc<VectorIndex> {
        // A panicking writer can only have been mid pointer swap, which
        // leaves either the old or the new Arc in place.
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Publish `index`, returning the one it replaces
    #[inline]
    pub fn replace(&self, index: VectorIndex) -> Arc<VectorIndex> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(index))
    }

    /// Rebuild from `directory` off to the side, then publish the result.
    /// On error the current index stays in place.
    #[inline]
    pub fn rebuild<F>(
        &self,
        directory: &Path,
        options: &ScanOptions,
        embedder: &dyn Embedder,
        progress: F,
    ) -> Result<RebuildStats>
    where
        F: FnMut(usize, usize),
    {
        let mut staging = VectorIndex::new(embedder.space());
        let stats = staging.rebuild_with(directory, options, embedder, progress)?;
        let previous = self.replace(staging);
        info!(
            "Published rebuilt index ({} entries, previously {})",
            stats.files_indexed,
            previous.len()
        );
        Ok(stats)
    }
}
