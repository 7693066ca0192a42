use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::preprocess::{prepare_image, PreprocessConfig};
use crate::{EmbedConfig, EmbedError, EmbeddingProvider};

/// Client for the Vertex AI multimodal embedding model.
///
/// One instance owns one pooled HTTP client; construct it once and share it.
#[derive(Debug, Clone)]
pub struct VertexEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
    timeout_secs: u64,
    preprocess: PreprocessConfig,
}

impl VertexEmbeddingProvider {
    pub fn new(cfg: &EmbedConfig) -> Result<Self, EmbedError> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| EmbedError::InvalidConfig(format!("http client: {err}")))?;
        Ok(Self {
            client,
            url: cfg.predict_url()?,
            access_token: cfg.access_token.clone(),
            timeout_secs: cfg.timeout_secs,
            preprocess: cfg.preprocess,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub(crate) fn build_payload(image_bytes: &[u8], dimension: usize) -> Value {
    json!({
        "instances": [{
            "image": { "bytesBase64Encoded": STANDARD.encode(image_bytes) }
        }],
        "parameters": { "dimension": dimension }
    })
}

pub(crate) fn parse_response(body: &Value, dimension: usize) -> Result<Vec<f64>, EmbedError> {
    let values = body
        .get("predictions")
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("imageEmbedding"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EmbedError::MalformedResponse("missing predictions[0].imageEmbedding".into())
        })?;

    let vector = values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| EmbedError::MalformedResponse(format!("non-numeric value {v}")))
        })
        .collect::<Result<Vec<f64>, _>>()?;

    if vector.len() != dimension {
        return Err(EmbedError::MalformedResponse(format!(
            "expected {dimension} values, got {}",
            vector.len()
        )));
    }
    Ok(vector)
}

/// Vertex answers `400 INVALID_ARGUMENT` for image bytes it cannot decode.
/// Any other failure status stays `Upstream`.
pub(crate) fn classify_failure(status: u16, body: String) -> EmbedError {
    if status == 400 || body.contains("INVALID_ARGUMENT") {
        EmbedError::InvalidImage(format!("rejected by embedding provider: {body}"))
    } else {
        EmbedError::Upstream { status, body }
    }
}

#[async_trait]
impl EmbeddingProvider for VertexEmbeddingProvider {
    async fn embed(&self, image_bytes: &[u8], dimension: usize) -> Result<Vec<f64>, EmbedError> {
        if image_bytes.is_empty() {
            return Err(EmbedError::InvalidImage("empty image payload".into()));
        }

        let prepared = if self.preprocess.enabled {
            let owned = image_bytes.to_vec();
            let cfg = self.preprocess;
            match tokio::task::spawn_blocking(move || prepare_image(&owned, &cfg).into_owned())
                .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "image preprocessing task failed, using original bytes");
                    image_bytes.to_vec()
                }
            }
        } else {
            image_bytes.to_vec()
        };

        let payload = build_payload(&prepared, dimension);
        debug!(bytes = prepared.len(), dimension, "requesting image embedding");

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| EmbedError::from_reqwest(err, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            warn!(%status, "embedding provider returned an error");
            return Err(classify_failure(status.as_u16(), body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| EmbedError::from_reqwest(err, self.timeout_secs))?;
        parse_response(&body, dimension)
    }

    fn name(&self) -> &'static str {
        "vertex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_base64_image_and_dimension() {
        let payload = build_payload(b"\xff\xd8\xff", 512);
        assert_eq!(
            payload["instances"][0]["image"]["bytesBase64Encoded"],
            "/9j/"
        );
        assert_eq!(payload["parameters"]["dimension"], 512);
    }

    #[test]
    fn parses_image_embedding() {
        let body = json!({ "predictions": [{ "imageEmbedding": [0.1, -0.2, 0.3] }] });
        assert_eq!(parse_response(&body, 3).unwrap(), vec![0.1, -0.2, 0.3]);
    }

    #[test]
    fn wrong_length_is_malformed() {
        let body = json!({ "predictions": [{ "imageEmbedding": [0.1, 0.2] }] });
        assert!(matches!(
            parse_response(&body, 512),
            Err(EmbedError::MalformedResponse(msg)) if msg.contains("512")
        ));
    }

    #[test]
    fn missing_embedding_is_malformed() {
        for body in [
            json!({}),
            json!({ "predictions": [] }),
            json!({ "predictions": [{ "textEmbedding": [1.0] }] }),
            json!({ "predictions": [{ "imageEmbedding": ["a"] }] }),
        ] {
            assert!(matches!(
                parse_response(&body, 1),
                Err(EmbedError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn provider_requires_project() {
        assert!(VertexEmbeddingProvider::new(&EmbedConfig::default()).is_err());
        let cfg = EmbedConfig {
            project: Some("p".into()),
            ..Default::default()
        };
        let provider = VertexEmbeddingProvider::new(&cfg).unwrap();
        assert!(provider.url().contains("/projects/p/"));
    }

    #[test]
    fn bad_request_is_an_invalid_image() {
        let err = classify_failure(400, r#"{"error":{"status":"INVALID_ARGUMENT"}}"#.into());
        assert!(matches!(err, EmbedError::InvalidImage(_)));
        for status in [401, 403, 429, 500, 503] {
            let err = classify_failure(status, "{}".into());
            assert!(matches!(err, EmbedError::Upstream { status: s, .. } if s == status));
        }
    }

    /// Serves one canned HTTP response on an ephemeral port and returns its base URL.
    async fn canned_endpoint(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // read headers, then the declared body, before answering
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    fn provider_at(api_base: String) -> VertexEmbeddingProvider {
        let cfg = EmbedConfig {
            project: Some("p".into()),
            api_base: Some(api_base),
            timeout_secs: 5,
            ..Default::default()
        };
        VertexEmbeddingProvider::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn undecodable_upload_rejected_by_provider_is_invalid_image() {
        let base = canned_endpoint(
            "400 Bad Request",
            r#"{"error":{"code":400,"status":"INVALID_ARGUMENT"}}"#,
        )
        .await;
        let err = provider_at(base)
            .embed(b"\x00\x01garbage", 128)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidImage(_)), "unexpected error: {err}");
        assert!(!err.is_upstream());
    }

    #[tokio::test]
    async fn quota_exhaustion_stays_upstream() {
        let base = canned_endpoint(
            "429 Too Many Requests",
            r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let err = provider_at(base).embed(b"jpeg bytes", 128).await.unwrap_err();
        assert!(
            matches!(err, EmbedError::Upstream { status: 429, .. }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported() {
        let cfg = EmbedConfig {
            project: Some("p".into()),
            api_base: Some("http://127.0.0.1:1".into()),
            timeout_secs: 2,
            ..Default::default()
        };
        let provider = VertexEmbeddingProvider::new(&cfg).unwrap();
        let err = provider.embed(b"not really a jpeg", 128).await.unwrap_err();
        assert!(err.is_upstream(), "unexpected error: {err}");
    }
}
