//! Answer cache
//!
//! Generated answers are memoized on the query plus the exact candidate set
//! that grounded them, so a change in the retrieved passages never serves a
//! stale answer. Two stores:
//! - Redis, shared across gateway replicas, with a TTL
//! - a bounded in-process map for single-node deployments and tests

use crate::config::CacheSettings;
use crate::errors::{AppError, Result};
use crate::models::Answer;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// Storage for generated answers
#[async_trait]
pub trait AnswerStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Answer>>;

    async fn put(&self, key: &str, answer: &Answer) -> Result<()>;
}

/// Redis cache client
pub struct Cache {
    connection: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(settings: &CacheSettings) -> Result<Self> {
        let client = Client::open(settings.url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection,
            key_prefix: settings.key_prefix.clone(),
            ttl_secs: settings.ttl_secs,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Get a value from cache
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        match value {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with the configured TTL
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;

        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(&full_key, &json, self.ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs = self.ttl_secs, "Cache set");
        Ok(())
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl AnswerStore for Cache {
    async fn get(&self, key: &str) -> Result<Option<Answer>> {
        self.get_json(key).await
    }

    async fn put(&self, key: &str, answer: &Answer) -> Result<()> {
        self.set_json(key, answer).await
    }
}

/// Bounded in-process store; evicts the oldest insertion when full
pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Answer>,
    order: VecDeque<String>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[async_trait]
impl AnswerStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Answer>> {
        Ok(self.inner.lock().await.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, answer: &Answer) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.entries.insert(key.to_string(), answer.clone()).is_none() {
            inner.order.push_back(key.to_string());
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        Ok(())
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Key for an answer grounded on `candidates` (`(document id, score)` in order)
    pub fn answer<'a, I>(query: &str, candidates: I) -> String
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        for (id, score) in candidates {
            hasher.update(format!("|{}_{:.4}", id, score).as_bytes());
        }
        format!("answer:{}", hex::encode(hasher.finalize()))
    }
}
