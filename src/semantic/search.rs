//! Semantic candidate retrieval.
//!
//! Every path answers the same question, "which items are near this vector",
//! behind [`SemanticSearch`]. [`ResilientSearch`] runs a primary path and
//! switches to a fallback when it errors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::content::{ContentStore, StoreError};

use super::index::{AnnStore, IndexError, VectorIndexAdapter};
use super::math::cosine_similarity;

/// Default number of stored vectors scanned by [`BruteForceSearch`].
pub const DEFAULT_CANDIDATE_LIMIT: usize = 100;

/// Item found by vector similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub item_id: String,
    /// Cosine similarity in [0.0, 1.0]
    pub similarity: f32,
}

/// Errors from search operations.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("item not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Hits with `similarity >= min_similarity`, best first, at most `limit`.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, SearchError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Search through the ANN index.
pub struct AnnSearch<S> {
    index: Arc<VectorIndexAdapter<S>>,
}

impl<S: AnnStore> AnnSearch<S> {
    pub fn new(index: Arc<VectorIndexAdapter<S>>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl<S: AnnStore> SemanticSearch for AnnSearch<S> {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, SearchError> {
        let hits = self.index.query(vector, limit, min_similarity).await?;
        Ok(hits
            .into_iter()
            .map(|h| SemanticHit {
                item_id: h.item_id,
                similarity: h.score.clamp(0.0, 1.0),
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "ann"
    }
}

/// Search executed by the content store's own vector support.
pub struct NativeStoreSearch {
    store: Arc<dyn ContentStore>,
}

impl NativeStoreSearch {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SemanticSearch for NativeStoreSearch {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, SearchError> {
        Ok(self
            .store
            .native_vector_search(vector, limit, min_similarity)
            .await?)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// Exact scan over the most recent stored vectors.
///
/// Never errors: a failing candidate load is logged and yields no hits.
pub struct BruteForceSearch {
    store: Arc<dyn ContentStore>,
    candidate_limit: usize,
}

impl BruteForceSearch {
    pub fn new(store: Arc<dyn ContentStore>, candidate_limit: usize) -> Self {
        Self {
            store,
            candidate_limit,
        }
    }

    /// Infallible form of [`SemanticSearch::search`].
    pub async fn scan(&self, vector: &[f32], limit: usize, min_similarity: f32) -> Vec<SemanticHit> {
        let candidates = match self.store.vector_candidates(self.candidate_limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("search=brute_force outcome=error err={e}");
                return vec![];
            }
        };

        let mut hits: Vec<SemanticHit> = candidates
            .iter()
            .filter_map(|item| {
                let similarity = cosine_similarity(vector, item.vector()?);
                (similarity >= min_similarity).then(|| SemanticHit {
                    item_id: item.id.clone(),
                    similarity,
                })
            })
            .collect();

        // stable sort keeps candidate order for equal scores
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        log::debug!(
            "search=brute_force candidates={} hits={}",
            candidates.len(),
            hits.len()
        );
        hits
    }
}

#[async_trait]
impl SemanticSearch for BruteForceSearch {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, SearchError> {
        Ok(self.scan(vector, limit, min_similarity).await)
    }

    fn name(&self) -> &'static str {
        "brute_force"
    }
}

/// Primary path with a fallback taken on any primary error.
pub struct ResilientSearch {
    primary: Option<Arc<dyn SemanticSearch>>,
    fallback: Arc<dyn SemanticSearch>,
}

impl ResilientSearch {
    pub fn new(primary: Option<Arc<dyn SemanticSearch>>, fallback: Arc<dyn SemanticSearch>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SemanticSearch for ResilientSearch {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, SearchError> {
        if let Some(primary) = &self.primary {
            match primary.search(vector, limit, min_similarity).await {
                Ok(hits) => return Ok(hits),
                Err(e) => log::warn!(
                    "search={} outcome=error fallback={} err={e}",
                    primary.name(),
                    self.fallback.name()
                ),
            }
        }

        self.fallback.search(vector, limit, min_similarity).await
    }

    fn name(&self) -> &'static str {
        "resilient"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentItem, EmbeddingUpdate, MemoryContentStore};
    use crate::semantic::index::{Distance, IndexPoint, MemoryAnnStore, ScoredPoint};
    use crate::semantic::payload::Payload;
    use crate::semantic::DIMENSIONS;

    /// Unit vector along axis `i`, tilted towards axis 0 by `tilt`.
    fn axis(i: usize, tilt: f32) -> Vec<f32> {
        let mut v = vec![0.0; DIMENSIONS];
        v[0] = tilt;
        v[i] = 1.0;
        v
    }

    fn item(id: &str, vector: Vec<f32>) -> ContentItem {
        ContentItem {
            embedding: Some(vector),
            ..ContentItem::new(id, id, "")
        }
    }

    fn store(items: Vec<ContentItem>) -> Arc<MemoryContentStore> {
        Arc::new(MemoryContentStore::new(items))
    }

    struct DownStore;

    #[async_trait]
    impl AnnStore for DownStore {
        async fn create_collection(&self, _: &str, _: usize, _: Distance) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }

        async fn upsert(&self, _: &str, _: Vec<IndexPoint>) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }

        async fn search(&self, _: &str, _: &[f32], _: usize, _: f32) -> Result<Vec<ScoredPoint>, IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }
    }

    struct FailingContentStore;

    #[async_trait]
    impl ContentStore for FailingContentStore {
        async fn get(&self, id: &str) -> Result<ContentItem, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }

        async fn vector_candidates(&self, _: usize) -> Result<Vec<ContentItem>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn keyword_candidates(&self, _: &str, _: usize) -> Result<Vec<ContentItem>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn missing_embeddings(&self, _: usize) -> Result<Vec<ContentItem>, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }

        async fn write_embedding(&self, _: &str, _: EmbeddingUpdate) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
    }

    #[tokio::test]
    async fn test_brute_force_filters_and_sorts() {
        let store = store(vec![
            item("far", axis(2, 0.0)),
            item("near", axis(1, 3.0)),
            item("mid", axis(1, 1.0)),
        ]);
        let search = BruteForceSearch::new(store, DEFAULT_CANDIDATE_LIMIT);

        let hits = search.scan(&axis(0, 1.0), 10, 0.5).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.item_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(hits[0].similarity > hits[1].similarity);
        assert!(hits.iter().all(|h| h.similarity >= 0.5 && h.similarity <= 1.0));

        let hits = search.scan(&axis(0, 1.0), 1, 0.0).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "near");
    }

    #[tokio::test]
    async fn test_brute_force_empty_store() {
        let search = BruteForceSearch::new(store(vec![]), DEFAULT_CANDIDATE_LIMIT);
        assert!(search.scan(&axis(0, 1.0), 10, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_brute_force_respects_candidate_limit() {
        let items = (0..10).map(|i| item(&i.to_string(), axis(1, 1.0))).collect();
        let search = BruteForceSearch::new(store(items), 3);
        assert_eq!(search.scan(&axis(1, 1.0), 10, 0.0).await.len(), 3);
    }

    #[tokio::test]
    async fn test_brute_force_never_errors() {
        let search = BruteForceSearch::new(Arc::new(FailingContentStore), DEFAULT_CANDIDATE_LIMIT);
        let hits = search.search(&axis(0, 1.0), 10, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_ann_search_maps_hits() {
        let adapter = Arc::new(VectorIndexAdapter::new(MemoryAnnStore::new(), "content", DIMENSIONS));
        adapter.upsert("a", axis(1, 3.0), Payload::new()).await.unwrap();
        adapter.upsert("b", axis(2, 0.0), Payload::new()).await.unwrap();

        let hits = AnnSearch::new(adapter)
            .search(&axis(0, 1.0), 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "a");
    }

    #[tokio::test]
    async fn test_resilient_failover_matches_brute_force() {
        let store = store(vec![
            item("a", axis(1, 3.0)),
            item("b", axis(1, 1.0)),
            item("c", axis(2, 0.0)),
        ]);
        let brute = Arc::new(BruteForceSearch::new(store, DEFAULT_CANDIDATE_LIMIT));
        let down = Arc::new(VectorIndexAdapter::new(DownStore, "content", DIMENSIONS));

        let primary: Arc<dyn SemanticSearch> = Arc::new(AnnSearch::new(down));
        let resilient = ResilientSearch::new(Some(primary), brute.clone());

        let query = axis(0, 1.0);
        let via_failover = resilient.search(&query, 10, 0.1).await.unwrap();
        let direct = brute.scan(&query, 10, 0.1).await;
        assert_eq!(via_failover, direct);
        assert!(!direct.is_empty());
    }

    #[tokio::test]
    async fn test_native_search_unsupported_falls_back() {
        let store = store(vec![item("a", axis(1, 3.0))]);
        let primary: Arc<dyn SemanticSearch> = Arc::new(NativeStoreSearch::new(store.clone()));
        let resilient = ResilientSearch::new(
            Some(primary),
            Arc::new(BruteForceSearch::new(store, DEFAULT_CANDIDATE_LIMIT)),
        );

        let hits = resilient.search(&axis(0, 1.0), 10, 0.1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "a");
    }

    #[tokio::test]
    async fn test_native_search_used_when_supported() {
        let store = Arc::new(
            MemoryContentStore::new(vec![item("a", axis(1, 3.0)), item("b", axis(2, 0.0))])
                .with_native_search(),
        );
        let hits = NativeStoreSearch::new(store)
            .search(&axis(0, 1.0), 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id, "a");
    }
}
