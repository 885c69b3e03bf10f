//! Search service tying embedding, indexing and ranking together.
//!
//! - Embeddings are attached in background tasks; writers never wait
//! - Semantic lookups go to the ANN index and fail over to a brute-force scan
//! - Semantic and keyword candidates are fused by [`HybridRanker`]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::SearchConfig;
use crate::content::{ContentItem, ContentStore, EmbeddingUpdate, StoreError};

use super::embeddings::Embedder;
use super::hybrid::{HybridRanker, KeywordHit, RankedHit};
use super::index::{AnnStore, VectorIndexAdapter};
use super::lexical::keyword_score;
use super::lifecycle::{Dispatch, EmbeddingState, LifecycleTracker};
use super::payload::Payload;
use super::preprocess::content_hash;
use super::search::{
    AnnSearch, BruteForceSearch, NativeStoreSearch, ResilientSearch, SearchError, SemanticHit,
    SemanticSearch,
};

/// Index adapter as held by the service.
pub type SharedIndex = Arc<VectorIndexAdapter<Arc<dyn AnnStore>>>;

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub item: ContentItem,
    pub similarity: f32,
    pub keyword_score: f32,
    pub fused_score: f32,
    pub rank: usize,
}

/// Outcome of one embedding dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    /// A vector was generated and written
    Embedded { model: String, indexed: bool },
    /// The stored vector is current
    Skipped,
}

/// Counts reported by [`SearchService::backfill`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub embedded: usize,
    /// Vectors produced by the hash fallback
    pub fallback: usize,
    pub indexed: usize,
    pub failed: usize,
}

/// Entry point for embedding and search operations. Cheap to clone.
#[derive(Clone)]
pub struct SearchService {
    embedder: Embedder,
    store: Arc<dyn ContentStore>,
    index: Option<SharedIndex>,
    semantic: Arc<dyn SemanticSearch>,
    ranker: HybridRanker,
    candidate_limit: usize,
    min_similarity: f32,
    tracker: Arc<LifecycleTracker>,
}

impl SearchService {
    /// Build a service. Without an index, semantic lookups scan stored
    /// vectors directly.
    pub fn new(
        embedder: Embedder,
        store: Arc<dyn ContentStore>,
        index: Option<SharedIndex>,
        config: &SearchConfig,
    ) -> Self {
        let primary: Option<Arc<dyn SemanticSearch>> = index
            .clone()
            .map(|index| Arc::new(AnnSearch::new(index)) as Arc<dyn SemanticSearch>);

        Self::with_primary(embedder, store, index, primary, config)
    }

    /// Build a service whose semantic lookups go to the content store's own
    /// vector search first.
    pub fn with_native_search(
        embedder: Embedder,
        store: Arc<dyn ContentStore>,
        index: Option<SharedIndex>,
        config: &SearchConfig,
    ) -> Self {
        let primary: Arc<dyn SemanticSearch> = Arc::new(NativeStoreSearch::new(store.clone()));
        Self::with_primary(embedder, store, index, Some(primary), config)
    }

    fn with_primary(
        embedder: Embedder,
        store: Arc<dyn ContentStore>,
        index: Option<SharedIndex>,
        primary: Option<Arc<dyn SemanticSearch>>,
        config: &SearchConfig,
    ) -> Self {
        let fallback = Arc::new(BruteForceSearch::new(store.clone(), config.candidate_limit));

        Self {
            embedder,
            store,
            index,
            semantic: Arc::new(ResilientSearch::new(primary, fallback)),
            ranker: HybridRanker::from(config),
            candidate_limit: config.candidate_limit,
            min_similarity: config.min_similarity,
            tracker: Arc::new(LifecycleTracker::new()),
        }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Generate and store a vector for an item in the background.
    ///
    /// Returns immediately. Skips the work when the item already has a
    /// vector that is not stale. Failures are recorded, see
    /// [`SearchService::last_error`].
    pub fn attach_embedding(&self, item_id: &str) -> JoinHandle<Result<AttachOutcome, SearchError>> {
        self.dispatch(item_id, false)
    }

    /// The item's text changed: mark its vector stale and recompute it.
    pub fn content_updated(&self, item_id: &str) -> JoinHandle<Result<AttachOutcome, SearchError>> {
        self.tracker.mark_stale(item_id);
        self.dispatch(item_id, true)
    }

    fn dispatch(
        &self,
        item_id: &str,
        force: bool,
    ) -> JoinHandle<Result<AttachOutcome, SearchError>> {
        let ticket = self.tracker.begin(item_id);
        let service = self.clone();
        let item_id = item_id.to_string();

        tokio::spawn(async move {
            let result = service.embed_item(&item_id, ticket, force).await;
            if let Err(e) = &result {
                log::error!("item={item_id} embedding outcome=error err={e}");
                service.tracker.fail(&item_id, ticket, e.to_string());
            }
            result
        })
    }

    async fn embed_item(
        &self,
        item_id: &str,
        ticket: Dispatch,
        force: bool,
    ) -> Result<AttachOutcome, SearchError> {
        let item = self.store.get(item_id).await.map_err(not_found)?;
        let text_hash = content_hash(&item.text);

        let stale = force || ticket.previous == EmbeddingState::Stale;
        let unchanged = self.tracker.text_hash(item_id) == Some(text_hash);
        if item.vector().is_some() && (!stale || unchanged) {
            log::debug!("item={item_id} embedding outcome=skipped");
            self.tracker.complete(item_id, ticket, text_hash);
            return Ok(AttachOutcome::Skipped);
        }

        let generated = self.embedder.generate_tagged(&item.text).await;
        if generated.is_fallback() {
            log::warn!("item={item_id} embedded with fallback model={}", generated.model);
        }

        let indexed = self.write_and_index(&item, &generated.vector, &generated.model).await?;
        self.tracker.complete(item_id, ticket, text_hash);

        Ok(AttachOutcome::Embedded {
            model: generated.model,
            indexed,
        })
    }

    /// Store the vector, then push it to the index. Index failures are
    /// logged; the item stays reachable through the brute-force path.
    async fn write_and_index(
        &self,
        item: &ContentItem,
        vector: &[f32],
        model: &str,
    ) -> Result<bool, SearchError> {
        let updated_at = Utc::now();
        self.store
            .write_embedding(
                &item.id,
                EmbeddingUpdate {
                    vector: vector.to_vec(),
                    model: model.to_string(),
                    updated_at,
                },
            )
            .await
            .map_err(not_found)?;

        let Some(index) = &self.index else {
            return Ok(false);
        };

        let payload = Payload::new()
            .with("model", model)
            .with("visible", item.visible)
            .with("created_at", item.created_at)
            .with("embedded_at", updated_at);

        match index.upsert(&item.id, vector, payload).await {
            Ok(()) => Ok(true),
            Err(e) => {
                log::warn!("item={} index upsert outcome=error err={e}", item.id);
                Ok(false)
            }
        }
    }

    /// Lifecycle state of an item.
    pub async fn state(&self, item_id: &str) -> Result<EmbeddingState, SearchError> {
        if let Some(state) = self.tracker.state(item_id) {
            return Ok(state);
        }

        let item = self.store.get(item_id).await.map_err(not_found)?;
        Ok(if item.vector().is_some() {
            EmbeddingState::Ready
        } else {
            EmbeddingState::New
        })
    }

    /// Error recorded by the last failed dispatch for an item.
    pub fn last_error(&self, item_id: &str) -> Option<String> {
        self.tracker.last_error(item_id)
    }

    /// Ranked items for `query`, fusing vector similarity with keyword
    /// matches. Never fails; backend errors produce fewer or no results.
    pub async fn hybrid_search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return vec![];
        }

        let vector = self.embedder.generate(query).await;

        let (semantic, keyword) = tokio::join!(
            self.semantic.search(&vector, self.candidate_limit, 0.0),
            self.store.keyword_candidates(query, self.candidate_limit),
        );

        let semantic = semantic.unwrap_or_else(|e| {
            log::error!("semantic lookup outcome=error err={e}");
            vec![]
        });
        let keyword_items = keyword.unwrap_or_else(|e| {
            log::error!("keyword lookup outcome=error err={e}");
            vec![]
        });

        let keyword_hits: Vec<KeywordHit> = keyword_items
            .iter()
            .filter(|item| item.visible)
            .map(|item| KeywordHit {
                item_id: item.id.clone(),
                score: keyword_score(query, &item.keywords),
            })
            .collect();

        let known: HashMap<String, ContentItem> = keyword_items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        let semantic_ids: Vec<&str> = semantic.iter().map(|hit| hit.item_id.as_str()).collect();
        let items = self.visible_items(&semantic_ids, known).await;

        // hidden or deleted items must not take a page slot
        let semantic: Vec<SemanticHit> = semantic
            .into_iter()
            .filter(|hit| items.contains_key(&hit.item_id))
            .collect();

        let ranked = self.ranker.rank(query, &semantic, &keyword_hits, limit);
        log::debug!(
            "query={query:?} semantic={} keyword={} ranked={}",
            semantic.len(),
            keyword_hits.len(),
            ranked.len()
        );

        attach_items(ranked, items)
    }

    /// Items most similar to an existing item, excluding the item itself.
    pub async fn find_similar(
        &self,
        item_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let item = self.store.get(item_id).await.map_err(not_found)?;

        let vector = match item.vector() {
            Some(vector) => vector.to_vec(),
            None => self.embedder.generate(&item.text).await,
        };

        let hits = self
            .semantic
            .search(&vector, limit.saturating_add(1), self.min_similarity)
            .await?;

        let hits: Vec<SemanticHit> = hits
            .into_iter()
            .filter(|hit| hit.item_id != item_id)
            .collect();
        let ids: Vec<&str> = hits.iter().map(|hit| hit.item_id.as_str()).collect();
        let items = self.visible_items(&ids, HashMap::new()).await;

        let ranked: Vec<RankedHit> = hits
            .into_iter()
            .filter(|hit| items.contains_key(&hit.item_id))
            .take(limit)
            .enumerate()
            .map(|(idx, hit)| RankedHit {
                item_id: hit.item_id,
                similarity: hit.similarity,
                keyword_score: 0.0,
                fused_score: hit.similarity,
                rank: idx + 1,
            })
            .collect();

        Ok(attach_items(ranked, items))
    }

    /// Embed up to `limit` items that have no vector yet.
    ///
    /// Texts go through [`Embedder::generate_batch`], so provider calls are
    /// batched and paced.
    pub async fn backfill(&self, limit: usize) -> Result<BackfillReport, SearchError> {
        let items = self.store.missing_embeddings(limit).await?;
        if items.is_empty() {
            return Ok(BackfillReport::default());
        }

        log::info!("backfill items={}", items.len());
        let texts: Vec<String> = items.iter().map(|i| i.text.clone()).collect();
        let generated = self.embedder.generate_batch(&texts).await;

        let mut report = BackfillReport::default();
        for (item, embedding) in items.iter().zip(generated) {
            match self
                .write_and_index(item, &embedding.vector, &embedding.model)
                .await
            {
                Ok(indexed) => {
                    report.embedded += 1;
                    report.indexed += usize::from(indexed);
                    report.fallback += usize::from(embedding.is_fallback());
                    self.tracker.mark_ready(&item.id, content_hash(&item.text));
                }
                Err(e) => {
                    log::warn!("item={} backfill outcome=error err={e}", item.id);
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "backfill embedded={} fallback={} indexed={} failed={}",
            report.embedded,
            report.fallback,
            report.indexed,
            report.failed
        );
        Ok(report)
    }

    /// Fetch the items behind `ids` that are not in `known` yet, keeping
    /// only visible ones. Ids the store no longer knows are dropped.
    async fn visible_items(
        &self,
        ids: &[&str],
        mut known: HashMap<String, ContentItem>,
    ) -> HashMap<String, ContentItem> {
        let missing: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !known.contains_key(*id))
            .collect();

        let fetched = join_all(missing.iter().map(|id| self.store.get(id))).await;
        for (id, result) in missing.iter().zip(fetched) {
            match result {
                Ok(item) => {
                    known.insert(item.id.clone(), item);
                }
                Err(e) => log::debug!("item={id} dropped from results err={e}"),
            }
        }

        known.retain(|_, item| item.visible);
        known
    }
}

/// Pair ranked hits with their items and renumber ranks.
fn attach_items(
    ranked: Vec<RankedHit>,
    mut items: HashMap<String, ContentItem>,
) -> Vec<SearchResult> {
    ranked
        .into_iter()
        .filter_map(|hit| {
            let item = items.remove(&hit.item_id)?;
            Some((hit, item))
        })
        .enumerate()
        .map(|(idx, (hit, item))| SearchResult {
            item,
            similarity: hit.similarity,
            keyword_score: hit.keyword_score,
            fused_score: hit.fused_score,
            rank: idx + 1,
        })
        .collect()
}

fn not_found(e: StoreError) -> SearchError {
    match e {
        StoreError::NotFound(id) => SearchError::NotFound(id),
        e => SearchError::Store(e),
    }
}
