//! Retrieval-only handler
//!
//! Runs dense and sparse search, fusion and reranking without generation,
//! returning the per-candidate rank diagnostics used to tune `alpha`.

use axum::{extract::State, Json};
use lexforge_common::errors::Result;
use lexforge_common::models::FusedResult;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use super::invalid;
use crate::AppState;

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 1000))]
    pub query: String,

    /// Maximum results to return (defaults to `retrieval.top_k`)
    #[validate(range(min = 1, max = 100))]
    pub top_k: Option<usize>,
}

/// Search response
#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub alpha: f64,
    pub rrf_k: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_degraded: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_degraded: Option<String>,
    pub total_results: usize,
    pub results: Vec<SearchResultItem>,
    pub processing_time_ms: u64,
}

#[derive(Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub citation: String,
    pub content: String,
    pub rrf_score: f64,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
    pub dense_contribution: f64,
    pub sparse_contribution: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl From<FusedResult> for SearchResultItem {
    fn from(result: FusedResult) -> Self {
        Self {
            citation: result.document().citation_label(),
            rrf_score: result.rrf_score,
            dense_rank: result.candidate.dense_rank,
            sparse_rank: result.candidate.sparse_rank,
            dense_contribution: result.dense_contribution,
            sparse_contribution: result.sparse_contribution,
            rerank_score: result.rerank_score,
            id: result.candidate.document.id,
            content: result.candidate.document.content,
        }
    }
}

/// Perform a hybrid search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();
    request.validate().map_err(invalid)?;

    let top_k = request.top_k.unwrap_or(state.config.retrieval.top_k);
    let found = state.pipeline.search(&request.query, top_k).await?;
    let fusion = state.pipeline.fusion();

    let processing_time_ms = start.elapsed().as_millis() as u64;
    tracing::info!(
        results = found.results.len(),
        degraded = found.is_degraded(),
        latency_ms = processing_time_ms,
        "Search completed"
    );

    Ok(Json(SearchResponse {
        query: request.query,
        alpha: fusion.alpha(),
        rrf_k: fusion.k(),
        dense_degraded: found.dense_degraded,
        sparse_degraded: found.sparse_degraded,
        total_results: found.results.len(),
        results: found.results.into_iter().map(SearchResultItem::from).collect(),
        processing_time_ms,
    }))
}
