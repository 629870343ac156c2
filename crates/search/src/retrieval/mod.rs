//! Hybrid retrieval system
//!
//! Two independent backends answer every retrieval query:
//! - Dense search (semantic similarity via embeddings, pgvector)
//! - Sparse search (keyword matching, Elasticsearch)
//!
//! Their ranked lists are merged by reciprocal rank fusion. A failing
//! backend degrades the search instead of failing it.

mod dense;
mod fusion;
mod hybrid;
mod sparse;

pub use dense::{DenseSearch, PgVectorStore, VectorStore};
pub use fusion::RankFusion;
pub use hybrid::{HybridResults, HybridRetriever};
pub use sparse::{normalize_query, ElasticsearchIndex, KeywordIndex, SparseSearch};

use lexforge_common::errors::{AppError, Result};
use lexforge_common::models::ScoredCandidate;
use lexforge_common::Document;
use std::future::Future;
use std::time::{Duration, Instant};

/// Which backend produced a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Dense,
    Sparse,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Dense => "dense",
            Backend::Sparse => "sparse",
        }
    }
}

/// Restrictions pushed down to both backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchFilter {
    /// Only documents currently in force
    pub effective_only: bool,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            effective_only: true,
        }
    }
}

/// Result of a single-backend search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// The backend answered; the list may legitimately be empty
    Found(Vec<ScoredCandidate>),

    /// The backend failed or timed out; treated as an empty list
    Degraded { reason: String },
}

impl SearchOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SearchOutcome::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            SearchOutcome::Degraded { reason } => Some(reason),
            SearchOutcome::Found(_) => None,
        }
    }

    pub fn into_candidates(self) -> Vec<ScoredCandidate> {
        match self {
            SearchOutcome::Found(candidates) => candidates,
            SearchOutcome::Degraded { .. } => Vec::new(),
        }
    }
}

/// Reject inputs every backend search treats as caller errors
pub(crate) fn validate_search(query: &str, k: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(AppError::validation("query", "query must not be empty"));
    }
    if k == 0 {
        return Err(AppError::validation("k", "k must be positive"));
    }
    Ok(())
}

/// Run one backend call under `timeout`, turning failure into a degraded outcome.
///
/// Hits are re-sorted by backend score (stable, so backend order breaks ties),
/// truncated to `k` and stamped with their 1-based rank for `backend`.
pub(crate) async fn guarded<F>(
    backend: Backend,
    timeout: Duration,
    k: usize,
    call: F,
) -> SearchOutcome
where
    F: Future<Output = Result<Vec<(Document, f32)>>>,
{
    let start = Instant::now();

    let hits = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(hits)) => hits,
        Ok(Err(e)) => {
            tracing::warn!(backend = backend.as_str(), error = %e, "Search backend failed");
            lexforge_common::metrics::record_backend(backend.as_str(), start.elapsed(), "error");
            return SearchOutcome::Degraded {
                reason: e.to_string(),
            };
        }
        Err(_) => {
            tracing::warn!(
                backend = backend.as_str(),
                timeout_ms = timeout.as_millis() as u64,
                "Search backend timed out"
            );
            lexforge_common::metrics::record_backend(backend.as_str(), start.elapsed(), "timeout");
            return SearchOutcome::Degraded {
                reason: format!("timed out after {}ms", timeout.as_millis()),
            };
        }
    };

    lexforge_common::metrics::record_backend(backend.as_str(), start.elapsed(), "ok");
    SearchOutcome::Found(rank(backend, hits, k))
}

fn rank(backend: Backend, mut hits: Vec<(Document, f32)>, k: usize) -> Vec<ScoredCandidate> {
    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);

    hits.into_iter()
        .enumerate()
        .map(|(i, (document, score))| {
            let mut candidate = ScoredCandidate::new(document, score);
            match backend {
                Backend::Dense => candidate.dense_rank = Some(i + 1),
                Backend::Sparse => candidate.sparse_rank = Some(i + 1),
            }
            candidate
        })
        .collect()
}
