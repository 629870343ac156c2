//! LexForge Search
//!
//! Query-time retrieval stages:
//! - Dense search (query embedding + pgvector nearest neighbours)
//! - Sparse search (Elasticsearch keyword matching)
//! - Hybrid retrieval with reciprocal rank fusion
//! - Cross-encoder reranking
//! - LLM relevance filtering
//!
//! Every stage takes its input by value and returns a new list; the only
//! shared state is the `Arc`'d backend clients.

pub mod reflection;
pub mod rerank;
pub mod retrieval;

pub use reflection::{FilterOutcome, RelevanceFilter};
pub use rerank::{CrossEncoder, HttpCrossEncoder, Reranker};
pub use retrieval::{
    DenseSearch, ElasticsearchIndex, HybridResults, HybridRetriever, KeywordIndex, PgVectorStore,
    RankFusion, SearchFilter, SearchOutcome, SparseSearch, VectorStore,
};
