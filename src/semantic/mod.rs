//! Text embeddings and hybrid semantic search.
//!
//! # Architecture
//!
//! - `embeddings`: provider chain with retries and a hash fallback
//! - `providers`: hosted inference API, plain HTTP endpoint, local model
//! - `index`: ANN collection adapter, `qdrant` implements it over REST
//! - `search`: ANN, native and brute-force semantic lookups
//! - `hybrid`: fusion of semantic and keyword scores
//! - `service`: background embedding, lifecycle and search entry points

pub mod embeddings;
pub mod fallback;
pub mod hybrid;
pub mod index;
pub mod lexical;
pub mod lifecycle;
pub mod math;
pub mod payload;
pub mod preprocess;
pub mod providers;
pub mod qdrant;
pub mod search;
pub mod service;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingProvider, GeneratedEmbedding, RetryPolicy};
pub use hybrid::HybridRanker;
pub use index::{AnnStore, IndexError, MemoryAnnStore, ShapeError, VectorIndexAdapter};
pub use lifecycle::EmbeddingState;
pub use qdrant::QdrantStore;
pub use search::{SearchError, SemanticHit};
pub use service::{AttachOutcome, BackfillReport, SearchResult, SearchService, SharedIndex};

/// Embedding dimensionality (all-MiniLM-L6-v2)
pub const DIMENSIONS: usize = 384;
