use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::hybrid::{DEFAULT_KEYWORD_WEIGHT, DEFAULT_SEMANTIC_WEIGHT};
use crate::semantic::providers::DEFAULT_INFERENCE_URL;
use crate::semantic::search::DEFAULT_CANDIDATE_LIMIT;
use crate::semantic::DIMENSIONS;

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model (384 dimensions)
const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
const DEFAULT_MAX_INPUT_CHARS: usize = 500;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_BATCH_PAUSE_MS: u64 = 1000;

const DEFAULT_INDEX_URL: &str = "http://localhost:6333";
const DEFAULT_COLLECTION: &str = "content";

const DEFAULT_MIN_SIMILARITY: f32 = 0.5;
const DEFAULT_SHORT_QUERY_MIN_SIMILARITY: f32 = 0.7;
const DEFAULT_SHORT_QUERY_TOKENS: usize = 2;

/// Provider token, used when `embedding.api_token` is not set
pub const ENV_PROVIDER_TOKEN: &str = "HF_API_TOKEN";
/// Vector store key, used when `index.api_key` is not set
pub const ENV_INDEX_API_KEY: &str = "QDRANT_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Embedding generation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Input is cut to this many characters before any provider call
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before attempt n+1 is `base_delay_ms * n`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hosted inference API, tried first. Empty disables it.
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    /// Plain HTTP endpoint accepting `{"inputs": text}`, tried second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Run a local model instead of the hosted API (requires `local-model`)
    #[serde(default)]
    pub local_model: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: DIMENSIONS,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            primary_url: default_primary_url(),
            secondary_url: None,
            api_token: None,
            local_model: false,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimensions() -> usize {
    DIMENSIONS
}

fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_primary_url() -> String {
    DEFAULT_INFERENCE_URL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_pause_ms() -> u64 {
    DEFAULT_BATCH_PAUSE_MS
}

/// Vector index settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Without an index, search always scans stored vectors
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_index_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_index_url(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

fn default_index_url() -> String {
    DEFAULT_INDEX_URL.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

/// Ranking settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Minimum fused score [0.0, 1.0]
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Floor applied instead when the query is short
    #[serde(default = "default_short_query_min_similarity")]
    pub short_query_min_similarity: f32,

    /// Queries with at most this many tokens count as short
    #[serde(default = "default_short_query_tokens")]
    pub short_query_tokens: usize,

    /// Stored vectors scanned when the index is unavailable
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            short_query_min_similarity: DEFAULT_SHORT_QUERY_MIN_SIMILARITY,
            short_query_tokens: DEFAULT_SHORT_QUERY_TOKENS,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

fn default_semantic_weight() -> f32 {
    DEFAULT_SEMANTIC_WEIGHT
}

fn default_keyword_weight() -> f32 {
    DEFAULT_KEYWORD_WEIGHT
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_short_query_min_similarity() -> f32 {
    DEFAULT_SHORT_QUERY_MIN_SIMILARITY
}

fn default_short_query_tokens() -> usize {
    DEFAULT_SHORT_QUERY_TOKENS
}

fn default_candidate_limit() -> usize {
    DEFAULT_CANDIDATE_LIMIT
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

fn check_url(name: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("{name} is not a valid url ({value}): {e}")))
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let emb = &self.embedding;
        if emb.dimensions != DIMENSIONS {
            return Err(ConfigError::Invalid(format!(
                "embedding.dimensions must be {DIMENSIONS}, got {}",
                emb.dimensions
            )));
        }
        if emb.max_input_chars == 0 {
            return Err(ConfigError::Invalid(
                "embedding.max_input_chars must be greater than 0".into(),
            ));
        }
        if emb.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "embedding.max_retries must be at least 1".into(),
            ));
        }
        if emb.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if emb.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if !emb.primary_url.is_empty() {
            check_url("embedding.primary_url", &emb.primary_url)?;
        }
        if let Some(url) = &emb.secondary_url {
            check_url("embedding.secondary_url", url)?;
        }

        if self.index.enabled {
            check_url("index.url", &self.index.url)?;
            if self.index.collection.trim().is_empty() {
                return Err(ConfigError::Invalid("index.collection must not be empty".into()));
            }
        }

        let search = &self.search;
        check_unit("search.semantic_weight", search.semantic_weight)?;
        check_unit("search.keyword_weight", search.keyword_weight)?;
        check_unit("search.min_similarity", search.min_similarity)?;
        check_unit(
            "search.short_query_min_similarity",
            search.short_query_min_similarity,
        )?;
        if search.candidate_limit == 0 {
            return Err(ConfigError::Invalid(
                "search.candidate_limit must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults if it is missing.
    ///
    /// Secrets missing from the file are taken from the environment and are
    /// never written back.
    pub fn load_with(base_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_path = base_path.as_ref();
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case new fields were added with defaults
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if self.embedding.api_token.is_none() {
            self.embedding.api_token = std::env::var(ENV_PROVIDER_TOKEN).ok();
        }
        if self.index.api_key.is_none() {
            self.index.api_key = std::env::var(ENV_INDEX_API_KEY).ok();
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.embedding.max_input_chars, 500);
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.search.semantic_weight, 0.7);
        assert_eq!(config.search.keyword_weight, 0.3);
        assert_eq!(config.search.candidate_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: Config = serde_yml::from_str("search:\n  min_similarity: 0.4\n").unwrap();
        assert_eq!(config.search.min_similarity, 0.4);
        assert_eq!(config.search.short_query_min_similarity, 0.7);
        assert_eq!(config.embedding, EmbeddingConfig::default());
        assert!(!config.index.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.search.semantic_weight = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.embedding.max_retries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.embedding.dimensions = 768;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.embedding.secondary_url = Some("not a url".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_disabled_index_url_not_checked() {
        let mut config = Config::default();
        config.index.url = "???".into();
        assert!(config.validate().is_ok());

        config.index.enabled = true;
        assert!(config.validate().is_err());
    }
}
