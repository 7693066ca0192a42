use serde::{Deserialize, Serialize};

use crate::preprocess::PreprocessConfig;
use crate::EmbedError;

/// Output sizes the multimodal embedding model supports.
pub const SUPPORTED_DIMENSIONS: [usize; 4] = [128, 256, 512, 1408];

pub fn validate_dimension(dimension: usize) -> Result<(), EmbedError> {
    if SUPPORTED_DIMENSIONS.contains(&dimension) {
        Ok(())
    } else {
        Err(EmbedError::InvalidConfig(format!(
            "embedding dimension {dimension} is not one of {SUPPORTED_DIMENSIONS:?}"
        )))
    }
}

/// Which provider implementation to build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    /// Vertex AI `multimodalembedding` model.
    #[default]
    Vertex,
    /// Deterministic hash-based vectors; no network.
    Stub,
}

impl std::str::FromStr for EmbedMode {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vertex" => Ok(EmbedMode::Vertex),
            "stub" => Ok(EmbedMode::Stub),
            other => Err(EmbedError::InvalidConfig(format!(
                "unknown embedding mode {other:?} (expected \"vertex\" or \"stub\")"
            ))),
        }
    }
}

/// Runtime configuration for the embedding provider.
///
/// # Example
/// ```
/// use embed::{EmbedConfig, EmbedMode};
///
/// let cfg = EmbedConfig {
///     mode: EmbedMode::Vertex,
///     project: Some("historicam-prod".into()),
///     ..Default::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbedConfig {
    #[serde(default)]
    pub mode: EmbedMode,
    /// GCP project hosting the model. Required in Vertex mode.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "EmbedConfig::default_location")]
    pub location: String,
    #[serde(default = "EmbedConfig::default_model")]
    pub model: String,
    /// OAuth bearer token sent with every request.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    /// Override for the API root (`https://<location>-aiplatform.googleapis.com`).
    #[serde(default)]
    pub api_base: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "EmbedConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

impl EmbedConfig {
    pub(crate) fn default_location() -> String {
        "us-central1".into()
    }

    pub(crate) fn default_model() -> String {
        "multimodalembedding@001".into()
    }

    pub(crate) fn default_timeout_secs() -> u64 {
        30
    }

    /// Stub-mode config, handy for tests and dry runs.
    pub fn stub() -> Self {
        Self {
            mode: EmbedMode::Stub,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), EmbedError> {
        if self.timeout_secs == 0 {
            return Err(EmbedError::InvalidConfig(
                "timeout_secs must be greater than zero".into(),
            ));
        }
        if self.mode == EmbedMode::Vertex {
            if self.project.as_deref().is_none_or(|p| p.trim().is_empty()) {
                return Err(EmbedError::InvalidConfig(
                    "project is required for the vertex embedding provider".into(),
                ));
            }
            if self.location.trim().is_empty() {
                return Err(EmbedError::InvalidConfig("location must not be empty".into()));
            }
            if self.model.trim().is_empty() {
                return Err(EmbedError::InvalidConfig("model must not be empty".into()));
            }
        }
        if !(1..=100).contains(&self.preprocess.jpeg_quality) {
            return Err(EmbedError::InvalidConfig(
                "preprocess.jpeg_quality must be within 1..=100".into(),
            ));
        }
        Ok(())
    }

    /// Full `:predict` URL for the configured model.
    pub fn predict_url(&self) -> Result<String, EmbedError> {
        let project = self.project.as_deref().ok_or_else(|| {
            EmbedError::InvalidConfig("project is required for the vertex embedding provider".into())
        })?;
        let base = self
            .api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", self.location));
        Ok(format!(
            "{}/v1/projects/{project}/locations/{}/publishers/google/models/{}:predict",
            base.trim_end_matches('/'),
            self.location,
            self.model
        ))
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            mode: EmbedMode::default(),
            project: None,
            location: Self::default_location(),
            model: Self::default_model(),
            access_token: None,
            api_base: None,
            timeout_secs: Self::default_timeout_secs(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_requires_project() {
        let err = EmbedConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("project"));
        assert!(EmbedConfig::stub().validate().is_ok());
    }

    #[test]
    fn predict_url_shape() {
        let cfg = EmbedConfig {
            project: Some("p1".into()),
            location: "europe-west4".into(),
            ..Default::default()
        };
        assert_eq!(
            cfg.predict_url().unwrap(),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/p1/locations/europe-west4/publishers/google/models/multimodalembedding@001:predict"
        );
        let local = EmbedConfig {
            api_base: Some("http://127.0.0.1:9000/".into()),
            ..cfg
        };
        assert!(local
            .predict_url()
            .unwrap()
            .starts_with("http://127.0.0.1:9000/v1/projects/p1/"));
    }

    #[test]
    fn supported_dimensions() {
        for dim in SUPPORTED_DIMENSIONS {
            assert!(validate_dimension(dim).is_ok());
        }
        assert!(validate_dimension(384).is_err());
        assert!(validate_dimension(0).is_err());
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Vertex".parse::<EmbedMode>().unwrap(), EmbedMode::Vertex);
        assert_eq!(" stub ".parse::<EmbedMode>().unwrap(), EmbedMode::Stub);
        assert!("onnx".parse::<EmbedMode>().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = EmbedConfig {
            timeout_secs: 0,
            ..EmbedConfig::stub()
        };
        assert!(cfg.validate().is_err());
    }
}
