
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::cache::CacheSettings;
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::models::{LOCAL_HASH_MODEL_ID, find_model};
use crate::embeddings::pool::{DEFAULT_WORKERS, MAX_WORKERS};
use crate::embeddings::provider::MAX_BATCH_SIZE;
use crate::index::{DEFAULT_HNSW_THRESHOLD, HnswConfig};
use crate::retrieval::SearchOptions;

pub const APP_DIR_NAME: &str = "nexus-rag";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CACHE_FILE_NAME: &str = "cache.db";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_HUGGINGFACE_URL: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    /// OpenAI-compatible API root for remote models
    pub base_url: String,
    /// Feature-extraction root for HuggingFace models; the model id is appended
    pub huggingface_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub workers: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub fallback_to_local: bool,
}

impl Default for EmbeddingSettings {
    #[inline]
    fn default() -> Self {
        Self {
            model: LOCAL_HASH_MODEL_ID.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            huggingface_url: DEFAULT_HUGGINGFACE_URL.to_string(),
            api_key: None,
            batch_size: MAX_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            timeout_seconds: 30,
            retry_attempts: 3,
            fallback_to_local: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexSettings {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub hnsw_threshold: usize,
}

impl Default for IndexSettings {
    #[inline]
    fn default() -> Self {
        let graph = HnswConfig::default();
        Self {
            m: graph.m,
            ef_construction: graph.ef_construction,
            ef_search: graph.ef_search,
            hnsw_threshold: DEFAULT_HNSW_THRESHOLD,
        }
    }
}

impl IndexSettings {
    #[inline]
    pub const fn hnsw_config(&self) -> HnswConfig {
        HnswConfig {
            m: self.m,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
    pub use_cache: bool,
}

impl Default for RetrievalSettings {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
            max_context_chars: 12_000,
            use_cache: true,
        }
    }
}

impl RetrievalSettings {
    #[inline]
    pub const fn search_options(&self) -> SearchOptions {
        SearchOptions {
            top_k: self.top_k,
            min_score: self.min_score,
            use_cache: self.use_cache,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 100)")]
    InvalidBatchSize(usize),
    #[error("Invalid worker count: {0} (must be between 1 and 16)")]
    InvalidWorkers(usize),
    #[error("Invalid request timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid graph degree: {0} (must be between 2 and 64)")]
    InvalidDegree(usize),
    #[error("Invalid ef_construction: {0} (must be between M and 2000)")]
    InvalidEfConstruction(usize),
    #[error("Invalid ef_search: {0} (must be between 1 and 2000)")]
    InvalidEfSearch(usize),
    #[error("Invalid HNSW threshold: {0} (must be at least 1)")]
    InvalidThreshold(usize),
    #[error("Invalid cache TTL for {0}: must be at least 1 second")]
    InvalidTtl(&'static str),
    #[error("Invalid cache read timeout: {0}ms (must be between 1 and 60000)")]
    InvalidReadTimeout(u64),
    #[error("Invalid maintenance interval: {0} (must be at least 1 second)")]
    InvalidMaintenanceInterval(u64),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid min_score: {0} (must be between -1 and 1)")]
    InvalidMinScore(f32),
    #[error("Invalid context budget: {0} (must be at least 1 character)")]
    InvalidContextBudget(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Platform config directory, e.g. `~/.config/nexus-rag` on Linux
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join(APP_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
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

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the SQLite cache
    #[inline]
    pub fn cache_path(&self) -> PathBuf {
        self.get_base_dir().join(CACHE_FILE_NAME)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.validate_chunking_config()?;
        self.validate_index_config()?;
        self.validate_cache_config()?;
        self.validate_retrieval_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(1..=100_000).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_index_config(&self) -> Result<(), ConfigError> {
        let config = &self.index;

        if !(2..=64).contains(&config.m) {
            return Err(ConfigError::InvalidDegree(config.m));
        }

        if !(config.m..=2000).contains(&config.ef_construction) {
            return Err(ConfigError::InvalidEfConstruction(config.ef_construction));
        }

        if !(1..=2000).contains(&config.ef_search) {
            return Err(ConfigError::InvalidEfSearch(config.ef_search));
        }

        if config.hnsw_threshold == 0 {
            return Err(ConfigError::InvalidThreshold(config.hnsw_threshold));
        }

        Ok(())
    }

    fn validate_cache_config(&self) -> Result<(), ConfigError> {
        let config = &self.cache;

        for (name, ttl) in [
            ("embeddings", config.embeddings_ttl_seconds),
            ("documents", config.documents_ttl_seconds),
            ("vector_index", config.vector_index_ttl_seconds),
            ("search_results", config.search_results_ttl_seconds),
        ] {
            if ttl == 0 {
                return Err(ConfigError::InvalidTtl(name));
            }
        }

        if !(1..=60_000).contains(&config.read_timeout_ms) {
            return Err(ConfigError::InvalidReadTimeout(config.read_timeout_ms));
        }

        if config.maintenance_interval_seconds == 0 {
            return Err(ConfigError::InvalidMaintenanceInterval(
                config.maintenance_interval_seconds,
            ));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        if !(1..=100).contains(&config.top_k) {
            return Err(ConfigError::InvalidTopK(config.top_k));
        }

        if !(-1.0..=1.0).contains(&config.min_score) {
            return Err(ConfigError::InvalidMinScore(config.min_score));
        }

        if config.max_context_chars == 0 {
            return Err(ConfigError::InvalidContextBudget(config.max_context_chars));
        }

        Ok(())
    }
}

impl EmbeddingSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        find_model(&self.model).map_err(|_| ConfigError::UnknownModel(self.model.clone()))?;
        self.base_url()?;
        self.huggingface_url()?;

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }

        if !(1..=300).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    #[inline]
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_http_url(&self.base_url)
    }

    #[inline]
    pub fn huggingface_url(&self) -> Result<Url, ConfigError> {
        parse_http_url(&self.huggingface_url)
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if find_model(&model).is_err() {
            return Err(ConfigError::UnknownModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let candidate = Self {
            base_url: base_url.clone(),
            ..self.clone()
        };
        candidate.base_url()?;
        self.base_url = base_url;
        Ok(())
    }

    #[inline]
    pub fn set_huggingface_url(&mut self, url: String) -> Result<(), ConfigError> {
        parse_http_url(&url)?;
        self.huggingface_url = url;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    #[inline]
    pub fn set_workers(&mut self, workers: usize) -> Result<(), ConfigError> {
        if !(1..=MAX_WORKERS).contains(&workers) {
            return Err(ConfigError::InvalidWorkers(workers));
        }
        self.workers = workers;
        Ok(())
    }
}

fn parse_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
    }
    Ok(url)
}
