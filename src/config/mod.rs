// Configuration management module
// TOML settings for embedding, chunking, indexing, caching and retrieval

pub mod settings;


pub use settings::{Config, ConfigError, EmbeddingSettings, IndexSettings, RetrievalSettings};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
