//! Ranker backed by a managed Vertex AI Vector Search index endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::ranker::SimilarityRanker;
use crate::types::{MatchError, NeighborMatch};

/// Connection settings for a deployed vector-search index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorSearchConfig {
    pub project: String,
    #[serde(default = "VectorSearchConfig::default_location")]
    pub location: String,
    pub endpoint_id: String,
    pub deployed_index_id: String,
    /// Public endpoint host (`<id>.<region>-<n>.vdb.vertexai.goog`). When
    /// unset, the regional `aiplatform.googleapis.com` host is used.
    #[serde(default)]
    pub public_domain: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "VectorSearchConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl VectorSearchConfig {
    pub(crate) fn default_location() -> String {
        "us-central1".to_string()
    }

    pub(crate) fn default_timeout_secs() -> u64 {
        10
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        for (name, value) in [
            ("project", &self.project),
            ("location", &self.location),
            ("endpoint_id", &self.endpoint_id),
            ("deployed_index_id", &self.deployed_index_id),
        ] {
            if value.trim().is_empty() {
                return Err(MatchError::InvalidConfig(format!(
                    "vector search {name} must not be empty"
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(MatchError::InvalidConfig(
                "vector search timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn find_neighbors_url(&self) -> String {
        let host = self
            .public_domain
            .clone()
            .unwrap_or_else(|| format!("{}-aiplatform.googleapis.com", self.location));
        format!(
            "https://{host}/v1/projects/{}/locations/{}/indexEndpoints/{}:findNeighbors",
            self.project, self.location, self.endpoint_id
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindNeighborsResponse {
    #[serde(default)]
    nearest_neighbors: Vec<QueryNeighbors>,
}

#[derive(Debug, Deserialize)]
struct QueryNeighbors {
    #[serde(default)]
    neighbors: Vec<Neighbor>,
}

#[derive(Debug, Deserialize)]
struct Neighbor {
    datapoint: Datapoint,
    #[serde(default)]
    distance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Datapoint {
    datapoint_id: String,
}

/// Convert a `findNeighbors` response body into ranked matches.
///
/// The index uses dot-product distance over normalized vectors, so
/// `similarity = 1 - distance`.
pub fn parse_find_neighbors(body: &str, top_k: usize) -> Result<Vec<NeighborMatch>, MatchError> {
    let response: FindNeighborsResponse = serde_json::from_str(body)
        .map_err(|err| MatchError::Backend(format!("malformed findNeighbors response: {err}")))?;
    let mut matches: Vec<NeighborMatch> = response
        .nearest_neighbors
        .into_iter()
        .next()
        .map(|q| q.neighbors)
        .unwrap_or_default()
        .into_iter()
        .map(|n| NeighborMatch::new(n.datapoint.datapoint_id, 1.0 - n.distance))
        .collect();
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(top_k);
    Ok(matches)
}

/// [`SimilarityRanker`] that delegates the nearest-neighbor search to a
/// deployed index endpoint.
#[derive(Debug, Clone)]
pub struct VectorSearchRanker {
    config: VectorSearchConfig,
    dimension: usize,
    client: reqwest::Client,
}

impl VectorSearchRanker {
    pub fn new(config: VectorSearchConfig, dimension: usize) -> Result<Self, MatchError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| MatchError::Backend(err.to_string()))?;
        Ok(Self {
            config,
            dimension,
            client,
        })
    }

    pub fn config(&self) -> &VectorSearchConfig {
        &self.config
    }
}

fn normalized(query: &[f64]) -> Vec<f64> {
    let norm = query.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 {
        return query.to_vec();
    }
    query.iter().map(|v| v / norm).collect()
}

#[async_trait]
impl SimilarityRanker for VectorSearchRanker {
    async fn rank(&self, query: &[f64], top_k: usize) -> Result<Vec<NeighborMatch>, MatchError> {
        if query.len() != self.dimension {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let body = json!({
            "deployedIndexId": self.config.deployed_index_id,
            "queries": [{
                "datapoint": {
                    "datapointId": "query",
                    "featureVector": normalized(query),
                },
                "neighborCount": top_k,
            }],
            "returnFullDatapoint": false,
        });

        let url = self.config.find_neighbors_url();
        debug!(%url, top_k, "querying vector search endpoint");
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| MatchError::Backend(format!("findNeighbors request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| MatchError::Backend(err.to_string()))?;
        if !status.is_success() {
            warn!(%status, "vector search endpoint returned an error");
            return Err(MatchError::Backend(format!(
                "findNeighbors returned {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }
        parse_find_neighbors(&text, top_k)
    }

    fn name(&self) -> &'static str {
        "vector_search"
    }
}
