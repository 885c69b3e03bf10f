//! Vector index adapter over one ANN collection.
//!
//! The adapter owns the collection lifecycle and the mapping between domain
//! items and store points:
//! - Single-flight, idempotent collection creation
//! - Domain id -> store point id mapping
//! - Vector shape validation before any remote write
//! - Payload sanitization

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::math::cosine_similarity;
use super::payload::Payload;

/// Payload key holding the domain id of a point.
pub const ITEM_ID_KEY: &str = "item_id";

/// Distance metric of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

/// Identifier accepted by the store: unsigned integer or UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Uuid(String),
}

impl PointId {
    /// Map a domain id to a stable store id.
    ///
    /// Unsigned integers and UUIDs pass through only in canonical form
    /// (`42`, lowercase hyphenated UUID), so two distinct ids never share a
    /// point. Any other id becomes a UUID built from the first 16 bytes of
    /// its SHA-256 digest.
    pub fn from_domain_id(id: &str) -> Self {
        if let Ok(n) = id.parse::<u64>() {
            if n.to_string() == id {
                return PointId::Num(n);
            }
        }
        if let Ok(uuid) = Uuid::parse_str(id) {
            let canonical = uuid.hyphenated().to_string();
            if canonical == id {
                return PointId::Uuid(canonical);
            }
        }

        let digest = Sha256::digest(id.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        PointId::Uuid(Uuid::from_bytes(bytes).hyphenated().to_string())
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{n}"),
            PointId::Uuid(s) => f.write_str(s),
        }
    }
}

/// A point ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexPoint {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A search hit as returned by the store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredPoint {
    pub id: PointId,
    pub score: f32,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// A search hit mapped back to the domain.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub item_id: String,
    pub score: f32,
}

/// Vector shape defects. Configuration or programming errors, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Non-finite value at index {0}")]
    NonFinite(usize),

    #[error("Value at index {0} is not a number")]
    NotNumeric(usize),

    #[error("Vector must be an array")]
    NotAnArray,

    #[error("Expected a single nested row, got {0}")]
    NestedRows(usize),
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("invalid vector: {0}")]
    Shape(#[from] ShapeError),

    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("collection already exists")]
    AlreadyExists,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Remote approximate nearest neighbor store.
#[async_trait]
pub trait AnnStore: Send + Sync {
    /// Create a collection. Returns [`IndexError::AlreadyExists`] if present.
    async fn create_collection(
        &self,
        name: &str,
        size: usize,
        distance: Distance,
    ) -> Result<(), IndexError>;

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), IndexError>;

    /// Nearest neighbors with `score >= score_threshold`, best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, IndexError>;
}

#[async_trait]
impl<T: AnnStore + ?Sized> AnnStore for std::sync::Arc<T> {
    async fn create_collection(
        &self,
        name: &str,
        size: usize,
        distance: Distance,
    ) -> Result<(), IndexError> {
        (**self).create_collection(name, size, distance).await
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), IndexError> {
        (**self).upsert(collection, points).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        (**self).search(collection, vector, limit, score_threshold).await
    }
}

/// Vector as handed to [`VectorIndexAdapter::upsert`].
#[derive(Debug, Clone)]
pub enum VectorInput {
    Flat(Vec<f32>),
    /// Accidentally wrapped vector, `[[...]]`.
    Nested(Vec<Vec<f32>>),
    /// Untyped JSON, e.g. read back from a document store.
    Json(Value),
}

impl From<Vec<f32>> for VectorInput {
    fn from(v: Vec<f32>) -> Self {
        VectorInput::Flat(v)
    }
}

impl From<&[f32]> for VectorInput {
    fn from(v: &[f32]) -> Self {
        VectorInput::Flat(v.to_vec())
    }
}

impl From<Value> for VectorInput {
    fn from(v: Value) -> Self {
        VectorInput::Json(v)
    }
}

/// Turn a vector input into exactly `dimensions` finite floats.
///
/// Unwraps a single nested array and coerces numeric strings. Several nested
/// rows are rejected rather than concatenated.
pub fn normalize_vector(input: VectorInput, dimensions: usize) -> Result<Vec<f32>, ShapeError> {
    let vector = match input {
        VectorInput::Flat(v) => v,
        VectorInput::Nested(mut outer) if outer.len() == 1 => outer.remove(0),
        VectorInput::Nested(outer) => return Err(ShapeError::NestedRows(outer.len())),
        VectorInput::Json(value) => coerce_json(value)?,
    };

    if vector.len() != dimensions {
        return Err(ShapeError::DimensionMismatch {
            expected: dimensions,
            got: vector.len(),
        });
    }
    if let Some(idx) = vector.iter().position(|x| !x.is_finite()) {
        return Err(ShapeError::NonFinite(idx));
    }

    Ok(vector)
}

fn coerce_json(value: Value) -> Result<Vec<f32>, ShapeError> {
    let Value::Array(mut items) = value else {
        return Err(ShapeError::NotAnArray);
    };
    if items.len() == 1 && items[0].is_array() {
        return coerce_json(items.remove(0));
    }

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Number(n) => n.as_f64().map(|f| f as f32).ok_or(ShapeError::NotNumeric(idx)),
            Value::String(s) => s
                .trim()
                .parse::<f32>()
                .map_err(|_| ShapeError::NotNumeric(idx)),
            _ => Err(ShapeError::NotNumeric(idx)),
        })
        .collect()
}

/// Adapter over one collection of an [`AnnStore`].
pub struct VectorIndexAdapter<S> {
    store: S,
    collection: String,
    dimensions: usize,
    ready: OnceCell<()>,
}

impl<S: AnnStore> VectorIndexAdapter<S> {
    pub fn new(store: S, collection: &str, dimensions: usize) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            dimensions,
            ready: OnceCell::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the collection once.
    ///
    /// Concurrent callers share the in-flight creation. An existing
    /// collection counts as success. A failure leaves the adapter not ready,
    /// so the next call tries again.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        self.ready
            .get_or_try_init(|| async {
                match self
                    .store
                    .create_collection(&self.collection, self.dimensions, Distance::Cosine)
                    .await
                {
                    Ok(()) => {
                        log::info!("collection={} created", self.collection);
                        Ok(())
                    }
                    Err(IndexError::AlreadyExists) => {
                        log::debug!("collection={} already exists", self.collection);
                        Ok(())
                    }
                    Err(e) => {
                        log::warn!("collection={} creation failed err={e}", self.collection);
                        Err(e)
                    }
                }
            })
            .await
            .map(|_| ())
    }

    /// Write one item's vector.
    ///
    /// The vector is validated before anything is sent, so a shape error
    /// never leaves a partial write behind.
    pub async fn upsert(
        &self,
        item_id: &str,
        vector: impl Into<VectorInput>,
        payload: Payload,
    ) -> Result<(), IndexError> {
        let vector = normalize_vector(vector.into(), self.dimensions)?;

        self.ensure_collection().await?;

        let mut payload = payload.sanitize();
        payload.insert(ITEM_ID_KEY.to_string(), Value::String(item_id.to_string()));

        let point = IndexPoint {
            id: PointId::from_domain_id(item_id),
            vector,
            payload,
        };
        self.store.upsert(&self.collection, vec![point]).await
    }

    /// Nearest items with `score >= min_score`, best first.
    pub async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<IndexHit>, IndexError> {
        if vector.len() != self.dimensions {
            return Err(ShapeError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            }
            .into());
        }

        self.ensure_collection().await?;

        let points = self
            .store
            .search(&self.collection, vector, limit, min_score)
            .await?;

        let mut hits: Vec<IndexHit> = points
            .into_iter()
            .filter(|p| p.score >= min_score)
            .map(|p| IndexHit {
                item_id: item_id_of(&p),
                score: p.score,
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        Ok(hits)
    }
}

/// Domain id stored in the payload, or the point id when missing.
fn item_id_of(point: &ScoredPoint) -> String {
    point
        .payload
        .as_ref()
        .and_then(|p| p.get(ITEM_ID_KEY))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| point.id.to_string())
}

struct MemoryCollection {
    dimensions: usize,
    points: HashMap<PointId, IndexPoint>,
}

/// In-process [`AnnStore`] doing exact cosine search.
///
/// Useful for local runs without a vector database and for tests.
#[derive(Default)]
pub struct MemoryAnnStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryAnnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of points in a collection, `None` if it does not exist.
    pub fn len(&self, collection: &str) -> Option<usize> {
        self.collections
            .read()
            .ok()?
            .get(collection)
            .map(|c| c.points.len())
    }

    fn lock_err<T>(e: std::sync::PoisonError<T>) -> IndexError {
        IndexError::Unavailable(format!("Lock poisoned: {}", e))
    }
}

#[async_trait]
impl AnnStore for MemoryAnnStore {
    async fn create_collection(
        &self,
        name: &str,
        size: usize,
        _distance: Distance,
    ) -> Result<(), IndexError> {
        let mut collections = self.collections.write().map_err(Self::lock_err)?;
        if collections.contains_key(name) {
            return Err(IndexError::AlreadyExists);
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                dimensions: size,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<IndexPoint>) -> Result<(), IndexError> {
        let mut collections = self.collections.write().map_err(Self::lock_err)?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| IndexError::Unavailable(format!("no collection {collection}")))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimensions) {
            return Err(ShapeError::DimensionMismatch {
                expected: target.dimensions,
                got: bad.vector.len(),
            }
            .into());
        }
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let collections = self.collections.read().map_err(Self::lock_err)?;
        let target = collections
            .get(collection)
            .ok_or_else(|| IndexError::Unavailable(format!("no collection {collection}")))?;

        let mut results: Vec<ScoredPoint> = target
            .points
            .values()
            .filter_map(|point| {
                let score = cosine_similarity(vector, &point.vector);
                (score >= score_threshold).then(|| ScoredPoint {
                    id: point.id.clone(),
                    score,
                    payload: Some(point.payload.clone()),
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(results)
    }
}
