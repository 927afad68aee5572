// Vector index module
// In-memory cosine index over whole-file code fragments, with persistence,
// directory rebuild and a snapshot holder for concurrent readers

pub mod persistence;
pub mod scanner;
mod shared;


use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::providers::{Embedder, EmbeddingSpace};
use crate::{CodeRagError, Result};

pub use persistence::{IndexHeader, IndexPaths};
pub use scanner::{ScanOptions, SourceFile, scan_directory};
pub use shared::SharedIndex;

/// A unit of indexed content: one whole source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFragment {
    /// Path relative to the indexed directory, `/`-separated
    pub path: String,
    /// First line, 1-based
    pub start_line: usize,
    /// Last line, inclusive
    pub end_line: usize,
    pub content: String,
}

impl CodeFragment {
    #[inline]
    pub fn whole_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let end_line = content.lines().count().max(1);
        Self {
            path: path.into(),
            start_line: 1,
            end_line,
            content,
        }
    }
}

impl fmt::Display for CodeFragment {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.path, self.start_line, self.end_line)
    }
}

/// A stored vector together with the fragment it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: u64,
    /// L2-normalized embedding
    pub vector: Vec<f32>,
    pub fragment: CodeFragment,
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub fragment: CodeFragment,
    /// Cosine similarity in `[-1, 1]`
    pub score: f32,
}

/// Counters reported by a rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
}

/// Exhaustive cosine-similarity index.
///
/// Entries live in a single vector ordered by id, so a vector can never be
/// separated from its metadata. Every vector has the same dimension, fixed by
/// the first insert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    space: EmbeddingSpace,
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
    next_id: u64,
    source_dir: Option<PathBuf>,
}

impl VectorIndex {
    /// An empty index for vectors of the given embedding space
    #[inline]
    pub fn new(space: EmbeddingSpace) -> Self {
        Self {
            space,
            dimension: None,
            entries: Vec::new(),
            next_id: 0,
            source_dir: None,
        }
    }

    #[inline]
    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    /// Vector length, known once the first entry is inserted
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Directory the index was last built from
    #[inline]
    pub fn source_dir(&self) -> Option<&Path> {
        self.source_dir.as_deref()
    }

    /// Append a fragment and its embedding, returning the assigned id.
    ///
    /// # Errors
    ///
    /// Fails with [`CodeRagError::DimensionMismatch`] when `vector` differs in
    /// length from the vectors already stored, and with
    /// [`CodeRagError::EmbeddingUnavailable`] for an empty vector.
    #[inline]
    pub fn insert(&mut self, vector: Vec<f32>, fragment: CodeFragment) -> Result<u64> {
        if vector.is_empty() {
            return Err(CodeRagError::EmbeddingUnavailable {
                provider: self.space.provider,
            });
        }
        self.check_dimension(vector.len())?;
        self.dimension = Some(vector.len());

        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(IndexEntry {
            id,
            vector: normalize(vector),
            fragment,
        });
        Ok(id)
    }

    /// The `k` entries most similar to `query`, best first. Equal scores keep
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Fails with [`CodeRagError::DimensionMismatch`] when the index is not
    /// empty and `query` has a different length than the stored vectors.
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query.len())?;

        let query = normalize(query.to_vec());
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, dot(&query, &entry.vector)))
            .collect();

        // Entries are stored in id order, so position breaks ties by insertion.
        scored.sort_by(|a, b| match b.1.total_cmp(&a.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(position, score)| {
                let entry = &self.entries[position];
                SearchHit {
                    id: entry.id,
                    fragment: entry.fragment.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Drop all entries and restart ids at zero
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dimension = None;
        self.next_id = 0;
        self.source_dir = None;
    }

    /// Replace the contents with a fresh scan of `directory`.
    ///
    /// Files under any of `ignore_paths` are skipped. The new entries are
    /// built in a staging index and only replace the current ones once the
    /// whole directory has been processed; on error the index is unchanged.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be read, when the embedder is
    /// unreachable or times out, or when it produces vectors of inconsistent
    /// dimension.
    #[inline]
    pub fn rebuild(
        &mut self,
        directory: &Path,
        ignore_paths: &[PathBuf],
        embedder: &dyn Embedder,
    ) -> Result<RebuildStats> {
        let options = ScanOptions {
            ignore_paths: ignore_paths.to_vec(),
            ..ScanOptions::default()
        };
        self.rebuild_with(directory, &options, embedder, |_, _| {})
    }

    /// [`rebuild`](Self::rebuild) with explicit scan options and a callback
    /// invoked after each file with its position and the total file count.
    #[inline]
    pub fn rebuild_with<F>(
        &mut self,
        directory: &Path,
        options: &ScanOptions,
        embedder: &dyn Embedder,
        mut progress: F,
    ) -> Result<RebuildStats>
    where
        F: FnMut(usize, usize),
    {
        let started = Instant::now();
        let files = scan_directory(directory, options)?;
        info!(
            "Rebuilding index from {} ({} eligible files)",
            directory.display(),
            files.len()
        );

        let mut staging = Self::new(embedder.space());
        staging.source_dir = Some(directory.to_path_buf());
        let mut stats = RebuildStats {
            files_scanned: files.len(),
            ..RebuildStats::default()
        };

        let total = files.len();
        for (position, file) in files.into_iter().enumerate() {
            match embedder.embed(&file.content) {
                Ok(vector) => {
                    let fragment = CodeFragment::whole_file(file.relative_path, file.content);
                    staging.insert(vector, fragment)?;
                    stats.files_indexed += 1;
                }
                // The backend refused this file (too long, unsupported input);
                // the rest of the directory can still be indexed.
                Err(
                    error @ (CodeRagError::ProviderBadResponse { .. }
                    | CodeRagError::EmbeddingUnavailable { .. }),
                ) => {
                    warn!("Skipping {}: {}", file.relative_path, error);
                    stats.files_skipped += 1;
                }
                Err(error) => return Err(error),
            }
            progress(position + 1, total);
        }

        debug!(
            "Indexed {} of {} files in {:?}",
            stats.files_indexed,
            stats.files_scanned,
            started.elapsed()
        );

        *self = staging;
        Ok(stats)
    }

    /// Build a new index from the configured watched directory
    #[inline]
    pub fn build_from_config<F>(
        config: &IndexConfig,
        embedder: &dyn Embedder,
        progress: F,
    ) -> Result<(Self, RebuildStats)>
    where
        F: FnMut(usize, usize),
    {
        let mut index = Self::new(embedder.space());
        let stats = index.rebuild_with(
            &config.watched_dir,
            &ScanOptions::from_config(config),
            embedder,
            progress,
        )?;

        if let Some(dimension) = index
            .dimension()
            .filter(|dimension| *dimension != config.embedding_dimension)
        {
            warn!(
                "Embedding model {} produces {}-dimensional vectors, but the configured dimension is {}",
                index.space(),
                dimension,
                config.embedding_dimension
            );
        }

        Ok((index, stats))
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        match self.dimension {
            Some(expected) if expected != actual => {
                Err(CodeRagError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    /// Rebuild an index from persisted parts. Ids must be strictly
    /// increasing and every vector must have `dimension` components.
    pub(crate) fn from_parts(
        space: EmbeddingSpace,
        dimension: Option<usize>,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        for pair in entries.windows(2) {
            if pair[0].id >= pair[1].id {
                return Err(CodeRagError::IndexUnavailable(format!(
                    "entry ids are out of order ({} before {})",
                    pair[0].id, pair[1].id
                )));
            }
        }
        if let Some(entry) = entries
            .iter()
            .find(|entry| Some(entry.vector.len()) != dimension)
        {
            return Err(CodeRagError::IndexUnavailable(format!(
                "entry {} has {} components, expected {:?}",
                entry.id,
                entry.vector.len(),
                dimension
            )));
        }

        let next_id = entries.last().map_or(0, |entry| entry.id + 1);
        Ok(Self {
            space,
            dimension: if entries.is_empty() { None } else { dimension },
            entries,
            next_id,
            source_dir: None,
        })
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = dot(&vector, &vector).sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
