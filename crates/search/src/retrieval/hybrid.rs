//! Hybrid retrieval combining dense and sparse search
//!
//! Both backends are queried concurrently and fused with RRF. One failed
//! backend degrades the result; both failing is an error. A backend switched
//! off in config is never queried and does not count as degraded.

use super::{
    dense::{DenseSearch, VectorStore},
    fusion::RankFusion,
    sparse::{KeywordIndex, SparseSearch},
    SearchFilter, SearchOutcome,
};
use lexforge_common::config::RetrievalConfig;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::models::FusedResult;
use lexforge_common::Embedder;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, Instrument};

/// Fused candidates plus the per-backend degradation report
#[derive(Debug, Clone, PartialEq)]
pub struct HybridResults {
    pub results: Vec<FusedResult>,

    /// Reason the dense backend was skipped, if it was
    pub dense_degraded: Option<String>,

    /// Reason the sparse backend was skipped, if it was
    pub sparse_degraded: Option<String>,
}

impl HybridResults {
    pub fn is_degraded(&self) -> bool {
        self.dense_degraded.is_some() || self.sparse_degraded.is_some()
    }
}

/// Hybrid retriever combining dense and sparse search
pub struct HybridRetriever {
    dense: DenseSearch,
    sparse: SparseSearch,
    fusion: RankFusion,
    dense_top_k: usize,
    sparse_top_k: usize,
    dense_enabled: bool,
    sparse_enabled: bool,
}

impl HybridRetriever {
    /// Create a new hybrid retriever; rejects invalid fusion parameters
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        index: Arc<dyn KeywordIndex>,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;

        let filter = SearchFilter {
            effective_only: config.effective_only,
        };
        let timeout = config.backend_timeout();

        Ok(Self {
            dense: DenseSearch::new(embedder, store, filter, timeout),
            sparse: SparseSearch::new(index, filter, timeout),
            fusion: RankFusion::new(config.alpha, config.rrf_k)?,
            dense_top_k: config.dense_top_k,
            sparse_top_k: config.sparse_top_k,
            dense_enabled: config.enable_dense,
            sparse_enabled: config.enable_sparse,
        })
    }

    pub fn fusion(&self) -> &RankFusion {
        &self.fusion
    }

    /// Retrieve and fuse, keeping the best `top_k` fused candidates
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<HybridResults> {
        if top_k == 0 {
            return Err(AppError::validation("top_k", "top_k must be positive"));
        }

        let start = Instant::now();

        let dense = async {
            if !self.dense_enabled {
                return Ok(SearchOutcome::Found(Vec::new()));
            }
            self.dense
                .search(query, self.dense_top_k)
                .instrument(info_span!("dense_search"))
                .await
        };
        let sparse = async {
            if !self.sparse_enabled {
                return Ok(SearchOutcome::Found(Vec::new()));
            }
            self.sparse
                .search(query, self.sparse_top_k)
                .instrument(info_span!("sparse_search"))
                .await
        };

        let (dense, sparse) = tokio::join!(dense, sparse);
        let (dense, sparse) = (dense?, sparse?);

        let dense_down = !self.dense_enabled || dense.is_degraded();
        let sparse_down = !self.sparse_enabled || sparse.is_degraded();
        if dense_down && sparse_down {
            return Err(AppError::RetrievalUnavailable {
                dense: dense.degraded_reason().unwrap_or("disabled").to_string(),
                sparse: sparse.degraded_reason().unwrap_or("disabled").to_string(),
            });
        }

        let dense_degraded = dense.degraded_reason().map(str::to_string);
        let sparse_degraded = sparse.degraded_reason().map(str::to_string);
        if dense_degraded.is_some() {
            lexforge_common::metrics::record_degraded("dense");
        }
        if sparse_degraded.is_some() {
            lexforge_common::metrics::record_degraded("sparse");
        }

        let dense = dense.into_candidates();
        let sparse = sparse.into_candidates();
        let (dense_hits, sparse_hits) = (dense.len(), sparse.len());

        let results = self.fusion.fuse(dense, sparse, top_k);

        debug!(
            dense_hits,
            sparse_hits,
            fused = results.len(),
            degraded = dense_degraded.is_some() || sparse_degraded.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Hybrid retrieval finished"
        );

        Ok(HybridResults {
            results,
            dense_degraded,
            sparse_degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexforge_common::embeddings::MockEmbedder;
    use lexforge_common::Document;

    struct Store(Result<Vec<&'static str>>);
    struct Index(Result<Vec<&'static str>>);

    fn hits(ids: &[&'static str]) -> Vec<(Document, f32)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (Document::new(*id, "text"), 1.0 - i as f32 * 0.1))
            .collect()
    }

    fn replay(result: &Result<Vec<&'static str>>) -> Result<Vec<(Document, f32)>> {
        match result {
            Ok(ids) => Ok(hits(ids)),
            Err(e) => Err(AppError::SearchBackend {
                backend: "fake".into(),
                message: e.to_string(),
            }),
        }
    }

    #[async_trait]
    impl VectorStore for Store {
        async fn nearest(&self, _: &[f32], _: usize, _: &SearchFilter) -> Result<Vec<(Document, f32)>> {
            replay(&self.0)
        }
    }

    #[async_trait]
    impl KeywordIndex for Index {
        async fn search(&self, _: &str, _: usize, _: &SearchFilter) -> Result<Vec<(Document, f32)>> {
            replay(&self.0)
        }
    }

    fn down() -> Result<Vec<&'static str>> {
        Err(AppError::ServiceUnavailable {
            message: "connection refused".into(),
        })
    }

    fn retriever(store: Store, index: Index) -> HybridRetriever {
        retriever_with(store, index, RetrievalConfig::default())
    }

    fn retriever_with(store: Store, index: Index, config: RetrievalConfig) -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(MockEmbedder::new(4)),
            Arc::new(store),
            Arc::new(index),
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_both_backends_fused() {
        let r = retriever(Store(Ok(vec!["D1", "D3", "D5"])), Index(Ok(vec!["D3", "D2", "D1"])));
        let out = r.retrieve("share transfer", 10).await.unwrap();
        assert!(!out.is_degraded());
        let ids: Vec<&str> = out.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["D1", "D3", "D5", "D2"]);
    }

    #[tokio::test]
    async fn test_dense_failure_degrades_to_sparse() {
        let r = retriever(Store(down()), Index(Ok(vec!["S1", "S2"])));
        let out = r.retrieve("share transfer", 10).await.unwrap();
        assert!(out.is_degraded());
        assert!(out.dense_degraded.is_some());
        assert!(out.sparse_degraded.is_none());
        let ids: Vec<&str> = out.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
    }

    #[tokio::test]
    async fn test_both_failing_is_unavailable() {
        let r = retriever(Store(down()), Index(down()));
        let err = tokio_test::assert_err!(r.retrieve("share transfer", 10).await);
        assert!(matches!(err, AppError::RetrievalUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_lists_are_not_degraded() {
        let r = retriever(Store(Ok(vec![])), Index(Ok(vec![])));
        let out = r.retrieve("share transfer", 10).await.unwrap();
        assert!(out.results.is_empty());
        assert!(!out.is_degraded());
    }

    #[tokio::test]
    async fn test_invalid_input_is_an_error_not_degradation() {
        let r = retriever(Store(Ok(vec!["D1"])), Index(Ok(vec!["D1"])));
        assert!(matches!(
            r.retrieve("   ", 10).await,
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            r.retrieve("x", 0).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_dense_switched_off_serves_sparse_alone() {
        let config = RetrievalConfig {
            enable_dense: false,
            ..RetrievalConfig::default()
        };
        // A broken store proves the dense side is never called
        let r = retriever_with(Store(down()), Index(Ok(vec!["S1", "S2"])), config);
        let out = r.retrieve("share transfer", 10).await.unwrap();
        assert!(!out.is_degraded());
        let ids: Vec<&str> = out.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert!(out.results.iter().all(|r| r.candidate.dense_rank.is_none()));
    }

    #[tokio::test]
    async fn test_sparse_switched_off_serves_dense_alone() {
        let config = RetrievalConfig {
            enable_sparse: false,
            ..RetrievalConfig::default()
        };
        let r = retriever_with(Store(Ok(vec!["D1", "D3"])), Index(down()), config);
        let out = r.retrieve("share transfer", 10).await.unwrap();
        assert!(!out.is_degraded());
        let ids: Vec<&str> = out.results.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["D1", "D3"]);
    }

    #[tokio::test]
    async fn test_only_enabled_backend_failing_is_unavailable() {
        let config = RetrievalConfig {
            enable_sparse: false,
            ..RetrievalConfig::default()
        };
        let r = retriever_with(Store(down()), Index(Ok(vec!["S1"])), config);
        let err = tokio_test::assert_err!(r.retrieve("share transfer", 10).await);
        match err {
            AppError::RetrievalUnavailable { dense, sparse } => {
                assert!(dense.contains("connection refused"));
                assert_eq!(sparse, "disabled");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_both_backends_switched_off_rejected() {
        let config = RetrievalConfig {
            enable_dense: false,
            enable_sparse: false,
            ..RetrievalConfig::default()
        };
        let built = HybridRetriever::new(
            Arc::new(MockEmbedder::new(4)),
            Arc::new(Store(Ok(vec![]))),
            Arc::new(Index(Ok(vec![]))),
            &config,
        );
        assert!(matches!(built, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_invalid_alpha_rejected_at_construction() {
        let config = RetrievalConfig {
            alpha: 2.0,
            ..RetrievalConfig::default()
        };
        let built = HybridRetriever::new(
            Arc::new(MockEmbedder::new(4)),
            Arc::new(Store(Ok(vec![]))),
            Arc::new(Index(Ok(vec![]))),
            &config,
        );
        assert!(built.is_err());
    }
}
