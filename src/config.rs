//! # Configuration
//!
//! §10: three layers, lowest precedence first — built-in defaults, an
//! optional TOML file (`./config.toml` by default, overridable with
//! `--config`), then environment variable overrides prefixed
//! `LOVKODE__SECTION__KEY`. Grounded on the donor `config.rs`'s
//! `Config::load`/`from_file`/`apply_env_overrides`/`validate` shape,
//! rescoped from the donor's server/trie/vector/storage/performance
//! section set down to the six sections this service actually has.

use crate::errors::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub ingestion: IngestionConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

/// Plumbed through to an eventual (out-of-scope) transport layer; not
/// consulted by the core itself beyond carrying the values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Embedded,
    Relational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub embedded_path: PathBuf,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub source_base_url: String,
    pub cache_dir: PathBuf,
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
    pub backoff_max_secs: f64,
    pub jitter: bool,
    pub download_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub cache_size: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub default_fts_weight: f64,
    pub default_probes: u32,
    pub exclude_amendments_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

const ENV_PREFIX: &str = "LOVKODE";

impl Config {
    /// Loads from `./config.toml`, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::warn!(?path, "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// `LOVKODE__SECTION__KEY` overrides, e.g. `LOVKODE__STORE__DATABASE_URL`.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env_var("SERVER__HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env_var("SERVER__PORT") {
            self.server.port = v.parse().map_err(|_| SearchError::InvalidInput("invalid SERVER__PORT".to_string()))?;
        }
        if let Ok(v) = env_var("STORE__BACKEND") {
            self.store.backend = match v.to_lowercase().as_str() {
                "embedded" => StoreBackend::Embedded,
                "relational" => StoreBackend::Relational,
                other => return Err(SearchError::InvalidInput(format!("unknown STORE__BACKEND: {}", other))),
            };
        }
        if let Ok(v) = env_var("STORE__EMBEDDED_PATH") {
            self.store.embedded_path = PathBuf::from(v);
        }
        if let Ok(v) = env_var("STORE__DATABASE_URL") {
            self.store.database_url = Some(v);
        }
        if let Ok(v) = env_var("STORE__MAX_CONNECTIONS") {
            self.store.max_connections = v.parse().map_err(|_| SearchError::InvalidInput("invalid STORE__MAX_CONNECTIONS".to_string()))?;
        }
        if let Ok(v) = env_var("INGESTION__SOURCE_BASE_URL") {
            self.ingestion.source_base_url = v;
        }
        if let Ok(v) = env_var("INGESTION__CACHE_DIR") {
            self.ingestion.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = env_var("EMBEDDING__API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Ok(v) = env_var("EMBEDDING__MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = env_var("SEARCH__DEFAULT_FTS_WEIGHT") {
            self.search.default_fts_weight =
                v.parse().map_err(|_| SearchError::InvalidInput("invalid SEARCH__DEFAULT_FTS_WEIGHT".to_string()))?;
        }
        if let Ok(v) = env_var("LOGGING__LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Relational
            && self.store.database_url.as_deref().unwrap_or("").is_empty()
        {
            return Err(SearchError::InvalidInput("store.database_url is required when backend = relational".to_string()));
        }
        if self.ingestion.max_attempts == 0 {
            return Err(SearchError::InvalidInput("ingestion.max_attempts must be positive".to_string()));
        }
        if self.ingestion.backoff_base_secs <= 0.0 || self.ingestion.backoff_max_secs <= 0.0 {
            return Err(SearchError::InvalidInput("ingestion backoff knobs must be positive".to_string()));
        }
        if self.ingestion.download_timeout_secs == 0 || self.ingestion.request_timeout_secs == 0 {
            return Err(SearchError::InvalidInput("ingestion timeout knobs must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.search.default_fts_weight) {
            return Err(SearchError::InvalidInput("search.default_fts_weight must be within [0, 1]".to_string()));
        }
        if self.embedding.dimension != crate::domain::Section::EMB_DIM {
            return Err(SearchError::InvalidInput(format!(
                "embedding.dimension must equal {}",
                crate::domain::Section::EMB_DIM
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(|e| SearchError::Permanent(format!("failed to serialize config: {}", e)))?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

fn env_var(suffix: &str) -> std::result::Result<String, std::env::VarError> {
    std::env::var(format!("{}__{}", ENV_PREFIX, suffix))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 8080 },
            store: StoreConfig {
                backend: StoreBackend::Embedded,
                embedded_path: PathBuf::from("./data/lovkode.db"),
                database_url: None,
                max_connections: 10,
            },
            ingestion: IngestionConfig {
                source_base_url: "https://api.lovdata.no".to_string(),
                cache_dir: PathBuf::from("./data/cache"),
                max_attempts: 3,
                backoff_base_secs: 0.5,
                backoff_max_secs: 30.0,
                jitter: true,
                download_timeout_secs: 300,
                request_timeout_secs: 30,
            },
            embedding: EmbeddingConfig {
                api_key: None,
                model: "gemini-embedding-001".to_string(),
                dimension: crate::domain::Section::EMB_DIM,
                cache_size: 1000,
                request_timeout_secs: 30,
            },
            search: SearchConfig {
                default_limit: 10,
                default_fts_weight: 0.5,
                default_probes: 10,
                exclude_amendments_default: true,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Pretty },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn relational_backend_requires_database_url() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Relational;
        assert!(config.validate().is_err());
        config.store.database_url = Some("postgres://localhost/lovkode".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fts_weight_out_of_range_rejected() {
        let mut config = Config::default();
        config.search.default_fts_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut config = Config::default();
        config.embedding.dimension = 768;
        assert!(config.validate().is_err());
    }
}
