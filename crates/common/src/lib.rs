//! LexForge Common Library
//!
//! Shared code for the LexForge crates including:
//! - Corpus and conversation models
//! - Embedding and language-model client abstractions
//! - Error types and handling
//! - Configuration management
//! - Answer cache, database pool, metrics and logging setup

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{LanguageModel, Prompt};
pub use models::{Answer, ConversationTurn, Document, FusedResult, Role, ScoredCandidate};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-large-zh-v1.5";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;

/// Answer returned when nothing in the corpus supports the question
pub const INSUFFICIENT_INFORMATION: &str =
    "Insufficient information: no reference passages relevant to this question were found.";
