//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use lexforge_common::errors::Result;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CheckResult>,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

async fn check<F>(ping: F) -> CheckResult
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    match ping.await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: lexforge_common::VERSION,
    })
}

/// Readiness probe - checks every configured dependency.
///
/// One search backend being down still leaves the service able to answer
/// in degraded mode, so only both being down marks it not ready.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let deps = &state.dependencies;

    let database = match &deps.db {
        Some(db) => Some(check(db.ping()).await),
        None => None,
    };
    let elasticsearch = match &deps.search_index {
        Some(index) => Some(check(index.ping()).await),
        None => None,
    };
    let cache = match &deps.cache {
        Some(cache) => Some(check(cache.ping()).await),
        None => None,
    };

    // A backend switched off in config never serves, whatever its probe says
    let retrieval = &state.config.retrieval;
    let dense_up = retrieval.enable_dense && database.as_ref().map_or(true, CheckResult::is_up);
    let sparse_up = retrieval.enable_sparse && elasticsearch.as_ref().map_or(true, CheckResult::is_up);
    let ready = dense_up || sparse_up;

    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                database,
                elasticsearch,
                cache,
            },
        }),
    )
}
