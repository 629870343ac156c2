//! Configuration management for LexForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use crate::errors::{AppError, Result};
use crate::models::Intent;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database (pgvector dense index) configuration
    pub database: DatabaseConfig,

    /// Elasticsearch (sparse index) configuration
    pub elasticsearch: ElasticsearchConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generative model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Cross-encoder reranker configuration
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Retrieval and fusion tunables
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Dialogue pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Answer cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Table holding passages and their embeddings
    #[serde(default = "default_passage_table")]
    pub passage_table: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. http://localhost:9200
    pub url: String,

    /// Index holding the pre-tokenized passages
    #[serde(default = "default_es_index")]
    pub index: String,

    /// Search-time analyzer matching the corpus language
    #[serde(default = "default_es_analyzer")]
    pub analyzer: String,

    /// Basic auth user
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_es_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai (any OpenAI-compatible endpoint), mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_model_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    #[serde(default = "default_model_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankerConfig {
    /// Cross-encoder scoring endpoint (text-embeddings-inference style `/rerank`)
    #[serde(default = "default_reranker_endpoint")]
    pub endpoint: String,

    /// Optional bearer token
    pub api_key: Option<String>,

    /// Model name reported in logs and metrics
    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Timeout in seconds
    #[serde(default = "default_reranker_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Fusion blend weight towards dense results, in [0, 1]
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// RRF smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// Dense candidate pool before fusion
    #[serde(default = "default_pool_size")]
    pub dense_top_k: usize,

    /// Sparse candidate pool before fusion
    #[serde(default = "default_pool_size")]
    pub sparse_top_k: usize,

    /// Fused candidates kept for reranking / filtering
    #[serde(default = "default_pool_size")]
    pub fused_top_k: usize,

    /// Candidates sent to the cross-encoder
    #[serde(default = "default_pool_size")]
    pub rerank_candidates: usize,

    /// Passages handed to the generator
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-backend timeout in milliseconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_ms: u64,

    /// Query the dense (pgvector) backend
    #[serde(default = "default_enabled")]
    pub enable_dense: bool,

    /// Query the sparse (Elasticsearch) backend
    #[serde(default = "default_enabled")]
    pub enable_sparse: bool,

    /// Restrict both backends to documents currently in force
    #[serde(default = "default_enabled")]
    pub effective_only: bool,

    /// Enable the cross-encoder stage
    #[serde(default = "default_enabled")]
    pub enable_rerank: bool,

    /// Enable the LLM relevance filter
    #[serde(default)]
    pub enable_relevance_filter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Prior messages read by the router and context routes
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Intent applied when classification yields no valid label
    #[serde(default = "default_fallback_intent")]
    pub fallback_intent: Intent,

    /// Rewrite queries into hypothetical passages before retrieval
    #[serde(default)]
    pub rewrite_query: bool,

    /// Generate answers on retrieval routes; when off the ordered passages
    /// are returned as sources with no generated text
    #[serde(default = "default_enabled")]
    pub enable_generation: bool,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Enable the answer cache
    #[serde(default)]
    pub enabled: bool,

    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Answer TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive (debug, info, lexforge_search=debug, ...)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name, logged at startup and attached to every metric as `service`
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_passage_table() -> String { "legal_passages".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_es_index() -> String { "legal_documents".to_string() }
fn default_es_analyzer() -> String { "ik_smart".to_string() }
fn default_es_timeout() -> u64 { 10 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_model_retries() -> u32 { 3 }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "deepseek-v3".to_string() }
fn default_temperature() -> f32 { 0.15 }
fn default_top_p() -> f32 { 0.8 }
fn default_max_tokens() -> usize { 1500 }
fn default_llm_timeout() -> u64 { 60 }
fn default_reranker_endpoint() -> String { "http://localhost:8081/rerank".to_string() }
fn default_reranker_model() -> String { "BAAI/bge-reranker-large".to_string() }
fn default_reranker_timeout() -> u64 { 10 }
fn default_alpha() -> f64 { 0.7 }
fn default_rrf_k() -> f64 { 60.0 }
fn default_pool_size() -> usize { 20 }
fn default_top_k() -> usize { 10 }
fn default_backend_timeout() -> u64 { 3000 }
fn default_enabled() -> bool { true }
fn default_history_window() -> usize { 2 }
fn default_fallback_intent() -> Intent { Intent::Continuation }
fn default_request_timeout() -> u64 { 90 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_cache_ttl() -> u64 { 3600 }
fn default_key_prefix() -> String { "lexforge".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "lexforge".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_model_retries(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_model_retries(),
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_reranker_endpoint(),
            api_key: None,
            model: default_reranker_model(),
            timeout_secs: default_reranker_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            rrf_k: default_rrf_k(),
            dense_top_k: default_pool_size(),
            sparse_top_k: default_pool_size(),
            fused_top_k: default_pool_size(),
            rerank_candidates: default_pool_size(),
            top_k: default_top_k(),
            backend_timeout_ms: default_backend_timeout(),
            enable_dense: default_enabled(),
            enable_sparse: default_enabled(),
            effective_only: default_enabled(),
            enable_rerank: default_enabled(),
            enable_relevance_filter: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            fallback_intent: default_fallback_intent(),
            rewrite_query: false,
            enable_generation: default_enabled(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            ttl_secs: default_cache_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl RetrievalConfig {
    /// Reject tunables the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(AppError::Configuration {
                message: format!("retrieval.alpha must be within [0, 1], got {}", self.alpha),
            });
        }
        if !(self.rrf_k > 0.0) {
            return Err(AppError::Configuration {
                message: format!("retrieval.rrf_k must be positive, got {}", self.rrf_k),
            });
        }
        if !self.enable_dense && !self.enable_sparse {
            return Err(AppError::Configuration {
                message: "retrieval.enable_dense and retrieval.enable_sparse cannot both be false".to_string(),
            });
        }
        for (name, value) in [
            ("dense_top_k", self.dense_top_k),
            ("sparse_top_k", self.sparse_top_k),
            ("fused_top_k", self.fused_top_k),
            ("rerank_candidates", self.rerank_candidates),
            ("top_k", self.top_k),
        ] {
            if value == 0 {
                return Err(AppError::Configuration {
                    message: format!("retrieval.{} must be positive", name),
                });
            }
        }
        Ok(())
    }

    /// Per-backend timeout as Duration
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/lexforge")?
            .set_default("elasticsearch.url", "http://localhost:9200")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__ALPHA=0.5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate cross-field constraints after loading
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        if self.pipeline.request_timeout_secs == 0 {
            return Err(AppError::Configuration {
                message: "pipeline.request_timeout_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/lexforge".to_string(),
                read_url: None,
                passage_table: default_passage_table(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            elasticsearch: ElasticsearchConfig {
                url: "http://localhost:9200".to_string(),
                index: default_es_index(),
                analyzer: default_es_analyzer(),
                username: None,
                password: None,
                timeout_secs: default_es_timeout(),
            },
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            retrieval: RetrievalConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
