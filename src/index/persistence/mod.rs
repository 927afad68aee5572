#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::{CodeFragment, IndexEntry, VectorIndex};
use crate::providers::EmbeddingSpace;
use crate::{CodeRagError, Result};

const VECTORS_MAGIC: &[u8; 8] = b"CRAGVEC2";
const METADATA_FORMAT_VERSION: u32 = 2;
/// Magic, dimension, entry count and build id
const VECTORS_HEADER_LEN: u64 = 28;

static PERSIST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Where an index is stored: a binary vector file and a JSON metadata file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    #[inline]
    pub fn exist(&self) -> bool {
        self.vectors.exists() && self.metadata.exists()
    }

    /// Delete both files, ignoring ones that are already gone
    #[inline]
    pub fn remove(&self) -> Result<()> {
        for path in [&self.vectors, &self.metadata] {
            match fs::remove_file(path) {
                Ok(()) => info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Descriptive part of the metadata file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub format_version: u32,
    pub space: EmbeddingSpace,
    pub dimension: Option<usize>,
    pub entry_count: usize,
    pub built_at: DateTime<Utc>,
    /// Also written to the vector file; both files of one build carry the same value
    pub build_id: u64,
    #[serde(default)]
    pub watched_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    #[serde(flatten)]
    header: IndexHeader,
    entries: Vec<MetadataEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataEntry {
    id: u64,
    fragment: CodeFragment,
}

impl VectorIndex {
    /// Write the index to `paths`. Each file is written to a temporary
    /// sibling first and renamed into place.
    #[inline]
    pub fn persist(&self, paths: &IndexPaths) -> Result<()> {
        let dimension = self.dimension.unwrap_or(0);
        let built_at = Utc::now();
        let build_id = build_id_for(built_at);

        let mut vectors = Vec::with_capacity(
            VECTORS_HEADER_LEN as usize + self.entries.len() * (8 + dimension * 4),
        );
        let stored_dimension = u32::try_from(dimension).map_err(|_| {
            CodeRagError::IndexUnavailable(format!("dimension {dimension} is too large to store"))
        })?;
        vectors.extend_from_slice(VECTORS_MAGIC);
        vectors.extend_from_slice(&stored_dimension.to_le_bytes());
        vectors.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        vectors.extend_from_slice(&build_id.to_le_bytes());
        for entry in &self.entries {
            vectors.extend_from_slice(&entry.id.to_le_bytes());
            for value in &entry.vector {
                vectors.extend_from_slice(&value.to_le_bytes());
            }
        }

        let metadata = MetadataFile {
            header: IndexHeader {
                format_version: METADATA_FORMAT_VERSION,
                space: self.space.clone(),
                dimension: self.dimension,
                entry_count: self.entries.len(),
                built_at,
                build_id,
                watched_dir: self.source_dir.clone(),
            },
            entries: self
                .entries
                .iter()
                .map(|entry| MetadataEntry {
                    id: entry.id,
                    fragment: entry.fragment.clone(),
                })
                .collect(),
        };
        let metadata_json = serde_json::to_vec_pretty(&metadata).map_err(|e| {
            CodeRagError::Other(anyhow::anyhow!("Failed to serialize metadata: {e}"))
        })?;

        write_atomically(&paths.vectors, &vectors)?;
        write_atomically(&paths.metadata, &metadata_json)?;

        info!(
            "Persisted {} entries ({} dimensions) to {}",
            self.entries.len(),
            dimension,
            paths.vectors.display()
        );
        Ok(())
    }

    /// Load an index written by [`persist`](Self::persist).
    ///
    /// `expected` is the embedding space of the current embedder; the stored
    /// vectors must come from the same space. When `expected_dimension` is
    /// known it must match the stored dimension too.
    ///
    /// # Errors
    ///
    /// [`CodeRagError::IndexUnavailable`] when a file is missing or corrupt,
    /// when the two files come from different builds or disagree on entry
    /// count, ids or dimension, or when the index was built by another model.
    /// [`CodeRagError::DimensionMismatch`] when `expected_dimension` differs
    /// from the stored dimension.
    #[inline]
    pub fn load(
        paths: &IndexPaths,
        expected: &EmbeddingSpace,
        expected_dimension: Option<usize>,
    ) -> Result<Self> {
        let metadata = read_metadata(&paths.metadata)?;
        let header = &metadata.header;

        if header.space != *expected {
            return Err(CodeRagError::IndexUnavailable(format!(
                "index was built with {} but the configured embedder is {}",
                header.space, expected
            )));
        }

        let stored = read_vectors(&paths.vectors)?;
        if stored.build_id != header.build_id {
            return Err(CodeRagError::IndexUnavailable(format!(
                "vector file belongs to build {:016x} but metadata to build {:016x}",
                stored.build_id, header.build_id
            )));
        }
        let stored_dimension = stored.dimension;
        let vectors = stored.vectors;

        if vectors.len() != metadata.entries.len() || header.entry_count != vectors.len() {
            return Err(CodeRagError::IndexUnavailable(format!(
                "vector file holds {} entries but metadata lists {} (header says {})",
                vectors.len(),
                metadata.entries.len(),
                header.entry_count
            )));
        }
        if header.dimension.unwrap_or(0) != stored_dimension {
            return Err(CodeRagError::IndexUnavailable(format!(
                "vector file stores {}-dimensional vectors but metadata says {:?}",
                stored_dimension, header.dimension
            )));
        }
        if let Some(expected) = expected_dimension
            .filter(|expected| stored_dimension > 0 && *expected != stored_dimension)
        {
            return Err(CodeRagError::DimensionMismatch {
                expected: stored_dimension,
                actual: expected,
            });
        }

        let mut entries = Vec::with_capacity(vectors.len());
        for ((id, vector), meta) in vectors.into_iter().zip(metadata.entries) {
            if id != meta.id {
                return Err(CodeRagError::IndexUnavailable(format!(
                    "vector id {id} does not match metadata id {}",
                    meta.id
                )));
            }
            entries.push(IndexEntry {
                id,
                vector,
                fragment: meta.fragment,
            });
        }

        let dimension = (stored_dimension > 0).then_some(stored_dimension);
        let mut index = Self::from_parts(metadata.header.space, dimension, entries)?;
        index.source_dir = metadata.header.watched_dir;
        info!(
            "Loaded index with {} entries ({} dimensions) from {}",
            index.len(),
            stored_dimension,
            paths.vectors.display()
        );
        Ok(index)
    }

    /// Read only the descriptive header of a persisted index
    #[inline]
    pub fn read_header(paths: &IndexPaths) -> Result<IndexHeader> {
        read_metadata(&paths.metadata).map(|metadata| metadata.header)
    }
}

fn read_metadata(path: &Path) -> Result<MetadataFile> {
    let file = open_existing(path)?;
    let metadata: MetadataFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        CodeRagError::IndexUnavailable(format!("corrupt metadata file {}: {e}", path.display()))
    })?;

    if metadata.header.format_version != METADATA_FORMAT_VERSION {
        return Err(CodeRagError::IndexUnavailable(format!(
            "unsupported metadata format version {}",
            metadata.header.format_version
        )));
    }
    Ok(metadata)
}

struct StoredVectors {
    dimension: usize,
    build_id: u64,
    vectors: Vec<(u64, Vec<f32>)>,
}

fn read_vectors(path: &Path) -> Result<StoredVectors> {
    let file = open_existing(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let corrupt = |what: &str| {
        CodeRagError::IndexUnavailable(format!("corrupt vector file {}: {what}", path.display()))
    };

    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|_| corrupt("truncated header"))?;
    if &magic != VECTORS_MAGIC {
        return Err(corrupt("bad magic"));
    }

    let mut word = [0u8; 4];
    let mut long = [0u8; 8];
    reader
        .read_exact(&mut word)
        .map_err(|_| corrupt("truncated header"))?;
    let dimension = u32::from_le_bytes(word);
    reader
        .read_exact(&mut long)
        .map_err(|_| corrupt("truncated header"))?;
    let count = u64::from_le_bytes(long);
    reader
        .read_exact(&mut long)
        .map_err(|_| corrupt("truncated header"))?;
    let build_id = u64::from_le_bytes(long);

    // Header values are untrusted until they agree with the file size
    let expected_len = u64::from(dimension)
        .checked_mul(4)
        .and_then(|vector_len| vector_len.checked_add(8))
        .and_then(|entry_len| entry_len.checked_mul(count))
        .and_then(|body_len| body_len.checked_add(VECTORS_HEADER_LEN))
        .ok_or_else(|| corrupt("header sizes overflow"))?;
    if expected_len > file_len {
        return Err(corrupt(&format!(
            "truncated entries ({file_len} bytes, header implies {expected_len})"
        )));
    }
    if expected_len < file_len {
        return Err(corrupt(&format!(
            "trailing data ({file_len} bytes, header implies {expected_len})"
        )));
    }
    let dimension = dimension as usize;
    let count = usize::try_from(count).map_err(|_| corrupt("bad count"))?;

    debug!(
        "Reading {} vectors of {} dimensions from {}",
        count,
        dimension,
        path.display()
    );

    let mut vectors = Vec::with_capacity(count);
    for _ in 0..count {
        reader
            .read_exact(&mut long)
            .map_err(|_| corrupt("truncated entry"))?;
        let id = u64::from_le_bytes(long);

        let mut vector = Vec::with_capacity(dimension);
        for _ in 0..dimension {
            reader
                .read_exact(&mut word)
                .map_err(|_| corrupt("truncated entry"))?;
            vector.push(f32::from_le_bytes(word));
        }
        vectors.push((id, vector));
    }

    Ok(StoredVectors {
        dimension,
        build_id,
        vectors,
    })
}

/// Build timestamp mixed with a per-process sequence so two persists in the
/// same instant still differ
fn build_id_for(built_at: DateTime<Utc>) -> u64 {
    let nanos = built_at.timestamp_nanos_opt().unwrap_or_default() as u64;
    let sequence = PERSIST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    nanos ^ sequence.rotate_right(16) ^ u64::from(std::process::id()).rotate_left(32)
}

fn open_existing(path: &Path) -> Result<fs::File> {
    fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CodeRagError::IndexUnavailable(format!("{} does not exist", path.display()))
        } else {
            CodeRagError::IndexUnavailable(format!("cannot open {}: {e}", path.display()))
        }
    })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let written =
        write_and_sync(&tmp_path, bytes).and_then(|()| Ok(fs::rename(&tmp_path, path)?));
    if written.is_err() {
        match fs::remove_file(&tmp_path) {
            Ok(()) => debug!("Removed {} after a failed write", tmp_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", tmp_path.display(), e),
        }
    }
    written
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    writer.write_all(bytes)?;
    writer
        .into_inner()
        .map_err(|e| CodeRagError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}
