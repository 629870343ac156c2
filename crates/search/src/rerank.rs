//! Cross-encoder reranking of the fused candidates
//!
//! The cross-encoder reads query and passage together, which is slower but
//! more precise than either retrieval score. Only the fused top-N reach it.
//! Any scorer problem leaves the fused order in place.

use async_trait::async_trait;
use lexforge_common::config::RerankerConfig;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::models::FusedResult;
use lexforge_common::retry::{classify_http_error, with_retry};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Joint query/passage relevance scorer
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per passage, in passage order; higher is more relevant
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

/// Client for a text-embeddings-inference style `/rerank` endpoint
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    config: RerankerConfig,
    timeout: Duration,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [&'a str],
    truncate: bool,
}

#[derive(Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(config: RerankerConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create reranker HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    async fn call(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let mut request = self.client.post(&self.config.endpoint).json(&RerankRequest {
            query,
            texts: passages,
            truncate: true,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_http_error(e, self.timeout, false))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(AppError::ServiceUnavailable {
                    message: format!("Reranker {}: {}", status, body),
                });
            }
            return Err(AppError::ModelError {
                message: format!("Reranker error {}: {}", status, body),
            });
        }

        let hits: Vec<RerankHit> = response.json().await.map_err(|e| AppError::MalformedModelOutput {
            stage: "rerank".to_string(),
            message: e.to_string(),
        })?;

        scores_in_order(hits, passages.len())
    }
}

/// Reassemble index-tagged scores into passage order
fn scores_in_order(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for hit in hits {
        match scores.get_mut(hit.index) {
            Some(slot) => *slot = Some(hit.score),
            None => {
                return Err(AppError::MalformedModelOutput {
                    stage: "rerank".to_string(),
                    message: format!("index {} out of range for {} passages", hit.index, expected),
                })
            }
        }
    }
    scores
        .into_iter()
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| AppError::MalformedModelOutput {
            stage: "rerank".to_string(),
            message: "missing score for some passages".to_string(),
        })
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        with_retry("rerank", 1, || self.call(query, passages)).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Fail-open reranking stage
pub struct Reranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
    max_candidates: usize,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, max_candidates: usize) -> Self {
        Self {
            encoder: Some(encoder),
            max_candidates: max_candidates.max(1),
        }
    }

    /// A reranker without a scorer: passes the fused order through
    pub fn disabled() -> Self {
        Self {
            encoder: None,
            max_candidates: 1,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.encoder.is_some()
    }

    /// Reorder the fused top-N by cross-encoder score and keep `top_k`.
    ///
    /// Equal scores keep their fused order. Without a scorer, or when scoring
    /// fails, the first `top_k` candidates are returned unchanged.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<FusedResult>,
        top_k: usize,
    ) -> Vec<FusedResult> {
        let encoder = match &self.encoder {
            Some(encoder) if !candidates.is_empty() => encoder,
            _ => {
                candidates.truncate(top_k);
                return candidates;
            }
        };

        candidates.truncate(self.max_candidates);

        let start = Instant::now();
        let passages: Vec<&str> = candidates.iter().map(|c| c.document().content.as_str()).collect();
        let scored = encoder.score(query, &passages).await;
        lexforge_common::metrics::record_model_call("rerank", start.elapsed(), scored.is_ok());

        let scores = match scored {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                tracing::warn!(
                    expected = candidates.len(),
                    got = scores.len(),
                    model = encoder.model_name(),
                    "Reranker returned a mismatched score vector, keeping fused order"
                );
                lexforge_common::metrics::record_fail_open("rerank", "length_mismatch");
                candidates.truncate(top_k);
                return candidates;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    model = encoder.model_name(),
                    "Reranker failed, keeping fused order"
                );
                lexforge_common::metrics::record_fail_open("rerank", "backend");
                candidates.truncate(top_k);
                return candidates;
            }
        };

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            candidate.rerank_score = Some(score);
        }

        // sort_by is stable: equal scores keep the fused order
        candidates.sort_by(|a, b| {
            let a = a.rerank_score.filter(|s| !s.is_nan()).unwrap_or(f32::NEG_INFINITY);
            let b = b.rerank_score.filter(|s| !s.is_nan()).unwrap_or(f32::NEG_INFINITY);
            b.partial_cmp(&a).unwrap_or(Ordering::Equal)
        });
        candidates.truncate(top_k);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexforge_common::models::ScoredCandidate;
    use lexforge_common::Document;
    use std::sync::Mutex;

    fn fused(ids: &[&str]) -> Vec<FusedResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| FusedResult {
                candidate: ScoredCandidate::new(Document::new(*id, format!("passage {}", id)), 0.0),
                rrf_score: 1.0 / (61.0 + i as f64),
                dense_contribution: 0.0,
                sparse_contribution: 0.0,
                rerank_score: None,
            })
            .collect()
    }

    fn ids(results: &[FusedResult]) -> Vec<&str> {
        results.iter().map(|r| r.id()).collect()
    }

    /// Scores passages from a fixed table and records batch sizes
    struct TableEncoder {
        scores: Vec<f32>,
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CrossEncoder for TableEncoder {
        async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(passages.len());
            Ok(self.scores.iter().take(passages.len()).copied().collect())
        }

        fn model_name(&self) -> &str {
            "table"
        }
    }

    struct FailingEncoder;

    #[async_trait]
    impl CrossEncoder for FailingEncoder {
        async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>> {
            Err(AppError::ModelTimeout { timeout_ms: 10 })
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    struct ShortEncoder;

    #[async_trait]
    impl CrossEncoder for ShortEncoder {
        async fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>> {
            Ok(vec![0.9])
        }

        fn model_name(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn test_reorders_by_score_and_truncates() {
        let encoder = Arc::new(TableEncoder {
            scores: vec![0.1, 0.9, 0.5, 0.9],
            seen: Mutex::new(vec![]),
        });
        let reranker = Reranker::new(encoder, 20);
        let out = reranker.rerank("q", fused(&["a", "b", "c", "d"]), 3).await;

        // b and d tie: fused order decides
        assert_eq!(ids(&out), vec!["b", "d", "c"]);
        assert_eq!(out[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_only_top_n_sent_to_scorer() {
        let encoder = Arc::new(TableEncoder {
            scores: vec![0.1, 0.2, 0.3, 0.4, 0.5],
            seen: Mutex::new(vec![]),
        });
        let reranker = Reranker::new(encoder.clone(), 2);
        let out = reranker.rerank("q", fused(&["a", "b", "c", "d", "e"]), 10).await;

        assert_eq!(*encoder.seen.lock().unwrap(), vec![2]);
        assert_eq!(ids(&out), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_failure_keeps_fused_order() {
        let reranker = Reranker::new(Arc::new(FailingEncoder), 20);
        let out = reranker.rerank("q", fused(&["a", "b", "c"]), 2).await;
        assert_eq!(ids(&out), vec!["a", "b"]);
        assert!(out.iter().all(|r| r.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_length_mismatch_keeps_fused_order() {
        let reranker = Reranker::new(Arc::new(ShortEncoder), 20);
        let out = reranker.rerank("q", fused(&["a", "b", "c"]), 5).await;
        assert_eq!(ids(&out), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_disabled_returns_prefix() {
        let out = Reranker::disabled().rerank("q", fused(&["a", "b", "c"]), 2).await;
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_scores_in_order() {
        let hits = vec![
            RerankHit { index: 2, score: 0.3 },
            RerankHit { index: 0, score: 0.9 },
            RerankHit { index: 1, score: 0.1 },
        ];
        assert_eq!(scores_in_order(hits, 3).unwrap(), vec![0.9, 0.1, 0.3]);

        let missing = vec![RerankHit { index: 0, score: 0.9 }];
        assert!(scores_in_order(missing, 2).is_err());

        let out_of_range = vec![RerankHit { index: 5, score: 0.9 }];
        assert!(scores_in_order(out_of_range, 2).is_err());
    }
}
