
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::index::IndexPaths;

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
const CONFIG_FILE_NAME: &str = "config.toml";
const HOME_ENV_VAR: &str = "CODERAG_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which backend serves embeddings and which serves generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub embedding: String,
    pub generation: String,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            embedding: "ollama".to_string(),
            generation: "ollama".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            chat_model: "llama2".to_string(),
            embedding_model: "llama2".to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory whose files are indexed
    pub watched_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_file: Option<PathBuf>,
    /// Expected embedding dimension. Only a hint: the real dimension comes
    /// from the first embedding or from the persisted index header.
    pub embedding_dimension: usize,
    /// Paths skipped during scanning, relative to `watched_dir` unless absolute
    pub ignore_paths: Vec<PathBuf>,
    /// File extensions eligible for indexing, without the leading dot
    pub extensions: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            watched_dir: PathBuf::from("."),
            vectors_file: None,
            metadata_file: None,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            ignore_paths: [".venv", "node_modules", "__pycache__", ".git", "tests"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            extensions: [
                "py", "rs", "js", "jsx", "ts", "tsx", "go", "java", "kt", "c", "h", "cpp", "hpp",
                "cs", "rb", "php", "swift", "scala", "sh",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_file_bytes: 512 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Hits scoring below this cosine similarity are dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_similarity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 4000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL: {0} (must be an http or https URL)")]
    InvalidUrl(String),
    #[error("Invalid provider selector: {0:?} (cannot be empty)")]
    InvalidProvider(String),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 65536)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid top-k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid minimum similarity: {0} (must be between -1.0 and 1.0)")]
    InvalidMinSimilarity(f32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be at least 1)")]
    InvalidMaxTokens(u32),
    #[error("Invalid request timeout: {0} seconds (must be between 1 and 3600)")]
    InvalidTimeout(u64),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvValue { name: &'static str, value: String },
    #[error("The hosted provider is selected but no API key is configured (set OPENAI_API_KEY)")]
    MissingApiKey,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load the configuration from the default directory and apply
    /// environment overrides.
    #[inline]
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Self::config_dir()?)?;
        config
            .apply_overrides(|name| std::env::var(name).ok())
            .context("Invalid environment override")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// Load the configuration file in `config_dir`, falling back to defaults
    /// when it does not exist.
    #[inline]
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Resolve the per-user configuration directory
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(HOME_ENV_VAR) {
            return Ok(PathBuf::from(dir));
        }
        dirs::home_dir()
            .map(|home| home.join(".coderag"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Locations of the persisted vector and metadata files
    #[inline]
    pub fn index_paths(&self) -> IndexPaths {
        let index_dir = self.get_base_dir().join("index");
        IndexPaths {
            vectors: self
                .index
                .vectors_file
                .clone()
                .unwrap_or_else(|| index_dir.join("vectors.bin")),
            metadata: self
                .index
                .metadata_file
                .clone()
                .unwrap_or_else(|| index_dir.join("metadata.json")),
        }
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.request_timeout_secs)
    }

    /// Layer environment variables over the loaded values. `lookup` returns
    /// the value of a variable if it is set.
    #[inline]
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MODEL_PROVIDER") {
            self.providers.embedding.clone_from(&v);
            self.providers.generation = v;
        }
        if let Some(v) = lookup("EMBEDDING_PROVIDER") {
            self.providers.embedding = v;
        }
        if let Some(v) = lookup("GENERATION_PROVIDER") {
            self.providers.generation = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = Some(v).filter(|key| !key.trim().is_empty());
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_EMBEDDING_MODEL") {
            self.openai.embedding_model = v;
        }
        if let Some(v) = lookup("OPENAI_CHAT_MODEL") {
            self.openai.chat_model = v;
        }
        if let Some(v) = lookup("OLLAMA_BASE_URL") {
            self.ollama.base_url = v;
        }
        if let Some(v) = lookup("OLLAMA_CHAT_MODEL") {
            self.ollama.chat_model = v;
        }
        if let Some(v) = lookup("OLLAMA_EMBEDDING_MODEL") {
            self.ollama.embedding_model = v;
        }
        if let Some(v) = lookup("EMBEDDING_DIM") {
            self.index.embedding_dimension =
                v.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvValue {
                        name: "EMBEDDING_DIM",
                        value: v.clone(),
                    })?;
        }
        if let Some(v) = lookup("WATCHED_DIR") {
            self.index.watched_dir = PathBuf::from(v);
        }
        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.providers.validate()?;
        self.ollama.validate()?;
        self.openai.validate()?;

        let dimension = self.index.embedding_dimension;
        if !(1..=65536).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }

        if !(1..=100).contains(&self.retrieval.top_k) {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }
        if let Some(floor) = self.retrieval.min_similarity.filter(|f| !(-1.0..=1.0).contains(f)) {
            return Err(ConfigError::InvalidMinSimilarity(floor));
        }

        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::InvalidTemperature(
                self.generation.temperature,
            ));
        }
        if self.generation.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.generation.max_tokens));
        }

        Ok(())
    }
}

impl ProvidersConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for selector in [&self.embedding, &self.generation] {
            if selector.trim().is_empty() {
                return Err(ConfigError::InvalidProvider(selector.clone()));
            }
        }
        if !(1..=3600).contains(&self.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.request_timeout_secs));
        }
        Ok(())
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_base_url(&self.base_url)?;
        validate_model(&self.chat_model)?;
        validate_model(&self.embedding_model)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.base_url)
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        parse_base_url(&base_url)?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_chat_model(&mut self, model: String) -> Result<(), ConfigError> {
        validate_model(&model)?;
        self.chat_model = model;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        validate_model(&model)?;
        self.embedding_model = model;
        Ok(())
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_base_url(&self.base_url)?;
        validate_model(&self.chat_model)?;
        validate_model(&self.embedding_model)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.base_url)
    }

    /// The API key, required before any hosted call is made
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }
}

fn parse_base_url(input: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(input).map_err(|_| ConfigError::InvalidUrl(input.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(input.to_string()));
    }
    Ok(url)
}

fn validate_model(model: &str) -> Result<(), ConfigError> {
    if model.trim().is_empty() {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }
    Ok(())
}
