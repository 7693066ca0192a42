use std::sync::Arc;

use log::{info, warn};
use tokio::sync::OnceCell;

use crate::{BlobStore, EmbeddingIndex, LoadError};

struct Loader {
    store: Arc<dyn BlobStore>,
    path: String,
    expected_dimension: Option<usize>,
}

/// Shared access to the reference index.
///
/// Either wraps an index loaded up front, or loads it on first use. Concurrent
/// first callers wait on a single load; a failed load leaves the handle empty
/// so the next caller retries.
pub struct IndexHandle {
    cell: OnceCell<Arc<EmbeddingIndex>>,
    loader: Option<Loader>,
}

impl IndexHandle {
    /// Handle over an index that is already in memory.
    pub fn ready(index: EmbeddingIndex) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Arc::new(index))),
            loader: None,
        }
    }

    /// Handle that loads `path` from `store` the first time it is needed.
    pub fn lazy(
        store: Arc<dyn BlobStore>,
        path: impl Into<String>,
        expected_dimension: Option<usize>,
    ) -> Self {
        Self {
            cell: OnceCell::new(),
            loader: Some(Loader {
                store,
                path: path.into(),
                expected_dimension,
            }),
        }
    }

    /// Return the index, loading it if this is the first call.
    pub async fn get(&self) -> Result<Arc<EmbeddingIndex>, LoadError> {
        if let Some(index) = self.cell.get() {
            return Ok(Arc::clone(index));
        }
        let Some(loader) = &self.loader else {
            return Err(LoadError::Source("index handle has no loader".into()));
        };
        let index = self
            .cell
            .get_or_try_init(|| async {
                info!("lazy-loading reference index from {}", loader.path);
                match EmbeddingIndex::load(
                    loader.store.as_ref(),
                    &loader.path,
                    loader.expected_dimension,
                )
                .await
                {
                    Ok(index) => Ok(Arc::new(index)),
                    Err(err) => {
                        warn!("reference index load failed: {err}");
                        Err(err)
                    }
                }
            })
            .await?;
        Ok(Arc::clone(index))
    }

    /// The index if it has already been loaded. Never triggers a load.
    pub fn loaded(&self) -> Option<Arc<EmbeddingIndex>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("loaded", &self.is_loaded())
            .field("path", &self.loader.as_ref().map(|l| l.path.as_str()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingStore {
        downloads: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl BlobStore for CountingStore {
        async fn download_text(&self, _path: &str) -> Result<String, LoadError> {
            let n = self.downloads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(LoadError::Source("transient".into()));
            }
            Ok("{\"id\":\"1_a\",\"embedding\":[1.0,0.0]}\n".to_string())
        }

        async fn exists(&self, _path: &str) -> Result<bool, LoadError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn ready_handle_is_loaded() {
        let index =
            EmbeddingIndex::from_records(vec![crate::EmbeddingRecord::new("1_a", vec![1.0])])
                .unwrap();
        let handle = IndexHandle::ready(index);
        assert!(handle.is_loaded());
        assert_eq!(handle.get().await.unwrap().size(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_loads_once() {
        let store = Arc::new(CountingStore {
            downloads: AtomicUsize::new(0),
            fail_first: false,
        });
        let handle = Arc::new(IndexHandle::lazy(store.clone(), "mem://index", Some(2)));
        assert!(!handle.is_loaded());
        assert!(handle.loaded().is_none());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { handle.get().await.map(|i| i.size()) }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }
        assert_eq!(store.downloads.load(Ordering::SeqCst), 1);
        assert!(handle.is_loaded());
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let store = Arc::new(CountingStore {
            downloads: AtomicUsize::new(0),
            fail_first: true,
        });
        let handle = IndexHandle::lazy(store.clone(), "mem://index", None);

        assert!(handle.get().await.is_err());
        assert!(!handle.is_loaded());
        assert_eq!(handle.get().await.unwrap().size(), 1);
        assert_eq!(store.downloads.load(Ordering::SeqCst), 2);
    }
}
