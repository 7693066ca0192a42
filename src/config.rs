//! YAML + environment configuration for HistoriCam identification.
//!
//! Settings are read from an optional YAML file and then overridden by
//! environment variables, so a deployment can ship one file and tweak it per
//! environment.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//!
//! gcp:
//!   project: "historicam-prod"
//!   location: "us-central1"
//!
//! index:
//!   embeddings_path: "gs://historicam-embeddings/v3/embeddings.jsonl"
//!   dimension: 512
//!   lazy_load: false
//!
//! ranker:
//!   backend: "exhaustive"      # or "vector_search"
//!   top_k: 5
//!
//! classifier:
//!   confidence: 0.7
//!   backup: 0.4
//!
//! embedding:
//!   mode: "vertex"             # or "stub"
//!   timeout_secs: 30
//! ```
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |---|---|
//! | `EMBEDDING_DIMENSION` | `index.dimension` |
//! | `TOP_K` | `ranker.top_k` |
//! | `CONFIDENCE_THRESHOLD` | `classifier.confidence` |
//! | `BACKUP_THRESHOLD` | `classifier.backup` |
//! | `EMBEDDINGS_PATH` | `index.embeddings_path` |
//! | `INDEX_LAZY_LOAD` | `index.lazy_load` |
//! | `GCP_PROJECT` / `GCP_LOCATION` / `GCP_ACCESS_TOKEN` | `gcp.*` |
//! | `RANKER_BACKEND` | `ranker.backend` |
//! | `VERTEX_ENDPOINT_ID` / `DEPLOYED_INDEX_ID` / `VECTOR_SEARCH_DOMAIN` | `ranker.*` |
//! | `EMBEDDING_MODE` / `EMBEDDING_TIMEOUT_SECS` | `embedding.*` |

use std::fs;
use std::path::Path;
use std::str::FromStr;

use embed::{EmbedConfig, EmbedMode, PreprocessConfig};
use matcher::Thresholds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidEnv { key: String, reason: String },
}

/// Top-level identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricamConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub gcp: GcpConfig,

    #[serde(default)]
    pub index: IndexSection,

    #[serde(default)]
    pub ranker: RankerSection,

    #[serde(default)]
    pub classifier: Thresholds,

    #[serde(default)]
    pub embedding: EmbeddingSection,
}

/// Google Cloud settings shared by the embedding provider, the vector-search
/// ranker and `gs://` sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcpConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_location")]
    pub location: String,
    /// OAuth bearer token. Never written back out.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project: None,
            location: default_location(),
            access_token: None,
        }
    }
}

/// Reference embedding set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSection {
    /// Local path or `gs://bucket/object` of the NDJSON record set.
    #[serde(default)]
    pub embeddings_path: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Load on first request instead of at startup.
    #[serde(default)]
    pub lazy_load: bool,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            embeddings_path: None,
            dimension: default_dimension(),
            lazy_load: false,
        }
    }
}

impl IndexSection {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        embed::validate_dimension(self.dimension)
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;
        if let Some(path) = &self.embeddings_path {
            if path.trim().is_empty() {
                return Err(ConfigLoadError::Validation(
                    "index.embeddings_path must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RankerBackend {
    /// Brute-force cosine scan over the in-memory index.
    #[default]
    Exhaustive,
    /// Managed vector-search index endpoint.
    VectorSearch,
}

impl FromStr for RankerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exhaustive" | "in_memory" | "memory" => Ok(RankerBackend::Exhaustive),
            "vector_search" | "vertex" => Ok(RankerBackend::VectorSearch),
            other => Err(format!(
                "unknown ranker backend {other:?} (expected \"exhaustive\" or \"vector_search\")"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankerSection {
    #[serde(default)]
    pub backend: RankerBackend,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub deployed_index_id: Option<String>,
    #[serde(default)]
    pub public_domain: Option<String>,
    #[serde(default = "default_ranker_timeout")]
    pub timeout_secs: u64,
}

impl Default for RankerSection {
    fn default() -> Self {
        Self {
            backend: RankerBackend::default(),
            top_k: default_top_k(),
            endpoint_id: None,
            deployed_index_id: None,
            public_domain: None,
            timeout_secs: default_ranker_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSection {
    #[serde(default)]
    pub mode: EmbedMode,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            mode: EmbedMode::default(),
            model: default_model(),
            api_base: None,
            timeout_secs: default_embedding_timeout(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl Default for HistoricamConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: None,
            gcp: GcpConfig::default(),
            index: IndexSection::default(),
            ranker: RankerSection::default(),
            classifier: Thresholds::default(),
            embedding: EmbeddingSection::default(),
        }
    }
}

impl HistoricamConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: HistoricamConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup path: optional YAML file, then process environment, then
    /// validation. Any error here is meant to stop the process.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => serde_yaml::from_str(&fs::read_to_string(path)?)?,
            None => HistoricamConfig::default(),
        };
        config.apply_env_with(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables fetched through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("EMBEDDING_DIMENSION") {
            self.index.dimension = parse_env("EMBEDDING_DIMENSION", &v)?;
        }
        if let Some(v) = get("TOP_K") {
            self.ranker.top_k = parse_env("TOP_K", &v)?;
        }
        if let Some(v) = get("CONFIDENCE_THRESHOLD") {
            self.classifier.confidence = parse_env("CONFIDENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("BACKUP_THRESHOLD") {
            self.classifier.backup = parse_env("BACKUP_THRESHOLD", &v)?;
        }
        if let Some(v) = get("EMBEDDINGS_PATH") {
            self.index.embeddings_path = Some(v);
        }
        if let Some(v) = get("INDEX_LAZY_LOAD") {
            self.index.lazy_load = parse_bool("INDEX_LAZY_LOAD", &v)?;
        }
        if let Some(v) = get("GCP_PROJECT") {
            self.gcp.project = Some(v);
        }
        if let Some(v) = get("GCP_LOCATION") {
            self.gcp.location = v;
        }
        if let Some(v) = get("GCP_ACCESS_TOKEN") {
            self.gcp.access_token = Some(v);
        }
        if let Some(v) = get("RANKER_BACKEND") {
            self.ranker.backend = v.parse().map_err(|reason| ConfigLoadError::InvalidEnv {
                key: "RANKER_BACKEND".into(),
                reason,
            })?;
        }
        if let Some(v) = get("VERTEX_ENDPOINT_ID") {
            self.ranker.endpoint_id = Some(v);
        }
        if let Some(v) = get("DEPLOYED_INDEX_ID") {
            self.ranker.deployed_index_id = Some(v);
        }
        if let Some(v) = get("VECTOR_SEARCH_DOMAIN") {
            self.ranker.public_domain = Some(v);
        }
        if let Some(v) = get("EMBEDDING_MODE") {
            self.embedding.mode = v.parse().map_err(|err: embed::EmbedError| {
                ConfigLoadError::InvalidEnv {
                    key: "EMBEDDING_MODE".into(),
                    reason: err.to_string(),
                }
            })?;
        }
        if let Some(v) = get("EMBEDDING_TIMEOUT_SECS") {
            self.embedding.timeout_secs = parse_env("EMBEDDING_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.index.validate()?;

        if self.ranker.top_k == 0 {
            return Err(ConfigLoadError::Validation(
                "ranker.top_k must be at least 1".into(),
            ));
        }
        self.classifier
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;

        match self.ranker.backend {
            RankerBackend::Exhaustive => {
                if self.index.embeddings_path.is_none() {
                    return Err(ConfigLoadError::MissingField(
                        "index.embeddings_path (EMBEDDINGS_PATH)".into(),
                    ));
                }
            }
            RankerBackend::VectorSearch => {
                if self.ranker.endpoint_id.is_none() {
                    return Err(ConfigLoadError::MissingField(
                        "ranker.endpoint_id (VERTEX_ENDPOINT_ID)".into(),
                    ));
                }
                if self.ranker.deployed_index_id.is_none() {
                    return Err(ConfigLoadError::MissingField(
                        "ranker.deployed_index_id (DEPLOYED_INDEX_ID)".into(),
                    ));
                }
                if self.gcp.project.is_none() {
                    return Err(ConfigLoadError::MissingField("gcp.project (GCP_PROJECT)".into()));
                }
                if self.ranker.timeout_secs == 0 {
                    return Err(ConfigLoadError::Validation(
                        "ranker.timeout_secs must be greater than zero".into(),
                    ));
                }
            }
        }

        if self.embedding.mode == EmbedMode::Vertex && self.gcp.project.is_none() {
            return Err(ConfigLoadError::MissingField("gcp.project (GCP_PROJECT)".into()));
        }
        self.embed_config()
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))
    }

    /// Provider configuration derived from the `embedding` and `gcp` sections.
    pub fn embed_config(&self) -> EmbedConfig {
        EmbedConfig {
            mode: self.embedding.mode,
            project: self.gcp.project.clone(),
            location: self.gcp.location.clone(),
            model: self.embedding.model.clone(),
            access_token: self.gcp.access_token.clone(),
            api_base: self.embedding.api_base.clone(),
            timeout_secs: self.embedding.timeout_secs,
            preprocess: self.embedding.preprocess,
        }
    }

    /// Vector-search endpoint settings, if the backend is configured.
    #[cfg(feature = "vector-search")]
    pub fn vector_search_config(&self) -> Result<matcher::VectorSearchConfig, ConfigLoadError> {
        let missing = |field: &str| ConfigLoadError::MissingField(field.to_string());
        Ok(matcher::VectorSearchConfig {
            project: self
                .gcp
                .project
                .clone()
                .ok_or_else(|| missing("gcp.project (GCP_PROJECT)"))?,
            location: self.gcp.location.clone(),
            endpoint_id: self
                .ranker
                .endpoint_id
                .clone()
                .ok_or_else(|| missing("ranker.endpoint_id (VERTEX_ENDPOINT_ID)"))?,
            deployed_index_id: self
                .ranker
                .deployed_index_id
                .clone()
                .ok_or_else(|| missing("ranker.deployed_index_id (DEPLOYED_INDEX_ID)"))?,
            public_domain: self.ranker.public_domain.clone(),
            access_token: self.gcp.access_token.clone(),
            timeout_secs: self.ranker.timeout_secs,
        })
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigLoadError::InvalidEnv {
            key: key.to_string(),
            reason: format!("{value:?}: {err}"),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigLoadError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigLoadError::InvalidEnv {
            key: key.to_string(),
            reason: format!("{other:?} is not a boolean"),
        }),
    }
}

fn default_version() -> String {
    "1.0".into()
}
fn default_location() -> String {
    "us-central1".into()
}
fn default_dimension() -> usize {
    512
}
fn default_top_k() -> usize {
    5
}
fn default_ranker_timeout() -> u64 {
    10
}
fn default_model() -> String {
    "multimodalembedding@001".into()
}
fn default_embedding_timeout() -> u64 {
    30
}
