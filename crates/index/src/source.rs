use std::path::Path;

use async_trait::async_trait;
use log::debug;

use crate::LoadError;

/// Read-only access to wherever the embedding record set lives.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the whole object as UTF-8 text.
    async fn download_text(&self, path: &str) -> Result<String, LoadError>;

    /// Whether the object exists. Errors are reserved for an unreachable store.
    async fn exists(&self, path: &str) -> Result<bool, LoadError>;
}

/// Files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBlobStore;

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn download_text(&self, path: &str) -> Result<String, LoadError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::SourceNotFound(path.to_string()))
            }
            Err(err) => Err(LoadError::Source(format!("{path}: {err}"))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, LoadError> {
        tokio::fs::try_exists(Path::new(path))
            .await
            .map_err(|err| LoadError::Source(format!("{path}: {err}")))
    }
}

/// Split `gs://bucket/object/name` into `("bucket", "object/name")`.
pub(crate) fn parse_gcs_path(path: &str) -> Result<(&str, &str), LoadError> {
    let rest = path
        .strip_prefix("gs://")
        .ok_or_else(|| LoadError::InvalidPath(format!("{path} is not a gs:// path")))?;
    match rest.split_once('/') {
        Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok((bucket, object)),
        _ => Err(LoadError::InvalidPath(format!(
            "{path} must look like gs://bucket/object"
        ))),
    }
}

#[cfg(feature = "source-gcs")]
mod gcs {
    use super::*;
    use reqwest::{StatusCode, Url};

    const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";

    /// Google Cloud Storage via the JSON API.
    ///
    /// Public buckets work without a token; private ones need an OAuth bearer
    /// token with `devstorage.read_only` scope.
    #[derive(Debug, Clone)]
    pub struct GcsBlobStore {
        client: reqwest::Client,
        base_url: String,
        bearer_token: Option<String>,
    }

    impl GcsBlobStore {
        pub fn new(bearer_token: Option<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: GCS_API_BASE.to_string(),
                bearer_token,
            }
        }

        /// Point at a different API root, e.g. a storage emulator.
        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }

        pub(crate) fn object_url(&self, path: &str, media: bool) -> Result<Url, LoadError> {
            let (bucket, object) = parse_gcs_path(path)?;
            let mut url = Url::parse(&self.base_url)
                .map_err(|err| LoadError::InvalidPath(format!("{}: {err}", self.base_url)))?;
            url.path_segments_mut()
                .map_err(|_| LoadError::InvalidPath(self.base_url.clone()))?
                .pop_if_empty()
                .extend(["b", bucket, "o", object]);
            if media {
                url.query_pairs_mut().append_pair("alt", "media");
            }
            Ok(url)
        }

        async fn get(&self, url: Url) -> Result<reqwest::Response, LoadError> {
            debug!("GET {url}");
            let mut request = self.client.get(url);
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }
            request.send().await.map_err(LoadError::source)
        }
    }

    #[async_trait]
    impl BlobStore for GcsBlobStore {
        async fn download_text(&self, path: &str) -> Result<String, LoadError> {
            let response = self.get(self.object_url(path, true)?).await?;
            match response.status() {
                status if status.is_success() => response.text().await.map_err(LoadError::source),
                StatusCode::NOT_FOUND => Err(LoadError::SourceNotFound(path.to_string())),
                status => Err(LoadError::Source(format!("{path}: storage returned {status}"))),
            }
        }

        async fn exists(&self, path: &str) -> Result<bool, LoadError> {
            let response = self.get(self.object_url(path, false)?).await?;
            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(LoadError::Source(format!("{path}: storage returned {status}"))),
            }
        }
    }
}

#[cfg(feature = "source-gcs")]
pub use gcs::GcsBlobStore;

/// Pick a store for `path`: `gs://` paths go to Cloud Storage, everything
/// else is read from disk.
pub fn blob_store_for(
    path: &str,
    bearer_token: Option<String>,
) -> Result<Box<dyn BlobStore>, LoadError> {
    if path.starts_with("gs://") {
        parse_gcs_path(path)?;
        #[cfg(feature = "source-gcs")]
        {
            return Ok(Box::new(GcsBlobStore::new(bearer_token)));
        }
        #[cfg(not(feature = "source-gcs"))]
        {
            let _ = bearer_token;
            return Err(LoadError::InvalidPath(format!(
                "{path}: GCS sources are disabled at compile time (enable the `source-gcs` feature)"
            )));
        }
    }
    let _ = bearer_token;
    Ok(Box::new(LocalBlobStore))
}
