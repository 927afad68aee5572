
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexConfig;
use crate::{CodeRagError, Result};

/// What the directory scan considers eligible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Skipped subtrees, relative to the scanned directory unless absolute
    pub ignore_paths: Vec<PathBuf>,
    /// Eligible extensions without the leading dot; empty accepts any file
    pub extensions: Vec<String>,
    /// Larger files are skipped
    pub max_file_bytes: u64,
}

impl Default for ScanOptions {
    #[inline]
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

impl ScanOptions {
    #[inline]
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            ignore_paths: config.ignore_paths.clone(),
            extensions: config.extensions.clone(),
            max_file_bytes: config.max_file_bytes,
        }
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }
}

/// A file selected for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the scanned directory, `/`-separated
    pub relative_path: String,
    pub content: String,
}

/// Walk `root` and read every eligible file, in file-name order.
///
/// Skips ignored subtrees, files with other extensions, files over the size
/// limit, files that are not UTF-8, and files with only whitespace.
///
/// # Errors
///
/// Fails with [`CodeRagError::IndexUnavailable`] when `root` is not a
/// readable directory.
#[inline]
pub fn scan_directory(root: &Path, options: &ScanOptions) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        return Err(CodeRagError::IndexUnavailable(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let ignored: Vec<PathBuf> = options
        .ignore_paths
        .iter()
        .map(|path| resolve_ignore_path(root, path))
        .collect();

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry, &ignored));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !options.accepts_extension(entry.path()) {
            continue;
        }

        if let Some(file) = read_source_file(root, &entry, options.max_file_bytes) {
            files.push(file);
        }
    }

    debug!("Scan of {} found {} files", root.display(), files.len());
    Ok(files)
}

fn read_source_file(root: &Path, entry: &DirEntry, max_file_bytes: u64) -> Option<SourceFile> {
    let path = entry.path();

    let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
    if size > max_file_bytes {
        debug!("Skipping {} ({} bytes over limit)", path.display(), size);
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Skipping {}: {}", path.display(), e);
            return None;
        }
    };
    if content.trim().is_empty() {
        return None;
    }

    let relative = path.strip_prefix(root).unwrap_or(path);
    Some(SourceFile {
        path: path.to_path_buf(),
        relative_path: to_slash_path(relative),
        content,
    })
}

fn resolve_ignore_path(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    lexically_normalize(&joined)
}

fn is_ignored(entry: &DirEntry, ignored: &[PathBuf]) -> bool {
    let path = lexically_normalize(entry.path());
    ignored.iter().any(|ignored| path.starts_with(ignored))
}

/// Drop `.` components so `./src` and `src` compare equal
fn lexically_normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
