//! Content store collaborator.
//!
//! Items are owned elsewhere; this crate only reads candidates and writes
//! derived embedding fields back.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::semantic::lexical::matches_any;
use crate::semantic::search::SemanticHit;
use crate::semantic::math::cosine_similarity;

/// A searchable content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_at: Option<DateTime<Utc>>,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_visible() -> bool {
    true
}

impl ContentItem {
    pub fn new(id: &str, text: &str, keywords: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            keywords: keywords.to_string(),
            embedding: None,
            embedding_model: None,
            embedded_at: None,
            visible: true,
            created_at: Utc::now(),
        }
    }

    /// Stored vector, if present and non-empty.
    pub fn vector(&self) -> Option<&[f32]> {
        self.embedding.as_deref().filter(|v| !v.is_empty())
    }
}

/// Derived fields written after embedding generation.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingUpdate {
    pub vector: Vec<f32>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("io error: {0:?}")]
    IO(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Primary content database, as seen by the search core.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<ContentItem, StoreError>;

    /// Visible items with a non-empty vector, most recent first.
    async fn vector_candidates(&self, limit: usize) -> Result<Vec<ContentItem>, StoreError>;

    /// Visible items whose keyword text contains a query term.
    async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError>;

    /// Items without a vector, oldest first.
    async fn missing_embeddings(&self, limit: usize) -> Result<Vec<ContentItem>, StoreError>;

    /// Last write wins.
    async fn write_embedding(&self, id: &str, update: EmbeddingUpdate) -> Result<(), StoreError>;

    /// Vector search executed by the database itself.
    async fn native_vector_search(
        &self,
        _vector: &[f32],
        _limit: usize,
        _min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        Err(StoreError::Unsupported("native vector search"))
    }
}

/// In-memory content store, optionally backed by a JSON file.
#[derive(Default)]
pub struct MemoryContentStore {
    items: RwLock<Vec<ContentItem>>,
    native_search: bool,
}

impl MemoryContentStore {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items: RwLock::new(items),
            native_search: false,
        }
    }

    /// Answer `native_vector_search` with an exact scan instead of
    /// reporting it as unsupported.
    pub fn with_native_search(mut self) -> Self {
        self.native_search = true;
        self
    }

    /// Load items from a JSON array file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let data = std::fs::read(path)?;
        let items: Vec<ContentItem> = serde_json::from_slice(&data)?;
        Ok(Self::new(items))
    }

    /// Write all items to a JSON array file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let items = self.snapshot()?;
        let data = serde_json::to_vec_pretty(&items)?;

        // write a sibling file, then rename over the target
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn insert(&self, item: ContentItem) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(lock_err)?;
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
        Ok(())
    }

    /// Replace the text of an item, keeping its derived fields.
    pub fn update_text(&self, id: &str, text: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(lock_err)?;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        item.text = text.to_string();
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<ContentItem>, StoreError> {
        Ok(self.items.read().map_err(lock_err)?.clone())
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable(format!("Lock poisoned: {}", e))
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, id: &str) -> Result<ContentItem, StoreError> {
        self.items
            .read()
            .map_err(lock_err)?
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn vector_candidates(&self, limit: usize) -> Result<Vec<ContentItem>, StoreError> {
        let items = self.items.read().map_err(lock_err)?;
        let mut candidates: Vec<ContentItem> = items
            .iter()
            .filter(|i| i.visible && i.vector().is_some())
            .cloned()
            .collect();

        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn keyword_candidates(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContentItem>, StoreError> {
        let items = self.items.read().map_err(lock_err)?;
        Ok(items
            .iter()
            .filter(|i| i.visible && matches_any(query, &i.keywords))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn missing_embeddings(&self, limit: usize) -> Result<Vec<ContentItem>, StoreError> {
        let items = self.items.read().map_err(lock_err)?;
        let mut missing: Vec<ContentItem> = items
            .iter()
            .filter(|i| i.vector().is_none())
            .cloned()
            .collect();

        missing.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        missing.truncate(limit);
        Ok(missing)
    }

    async fn write_embedding(&self, id: &str, update: EmbeddingUpdate) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(lock_err)?;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        item.embedding = Some(update.vector);
        item.embedding_model = Some(update.model);
        item.embedded_at = Some(update.updated_at);
        Ok(())
    }

    async fn native_vector_search(
        &self,
        vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        if !self.native_search {
            return Err(StoreError::Unsupported("native vector search"));
        }

        let items = self.items.read().map_err(lock_err)?;
        let mut hits: Vec<SemanticHit> = items
            .iter()
            .filter(|i| i.visible)
            .filter_map(|i| {
                let similarity = cosine_similarity(vector, i.vector()?);
                (similarity >= min_similarity).then(|| SemanticHit {
                    item_id: i.id.clone(),
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
