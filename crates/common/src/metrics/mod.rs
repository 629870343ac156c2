//! Metrics and observability utilities
//!
//! Prometheus metrics with latency-aligned histograms and standardized
//! naming conventions. Recording is a no-op until an exporter is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::{Duration, Instant};

/// Metrics prefix for all LexForge metrics
pub const METRICS_PREFIX: &str = "lexforge";

/// Histogram buckets for request and backend latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for model calls (embedding, rerank, generation are slower)
pub const MODEL_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
];

fn name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(name("requests_total"), Unit::Count, "Total number of HTTP requests");
    describe_histogram!(
        name("request_duration_seconds"),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        name("backend_queries_total"),
        Unit::Count,
        "Retrieval backend queries by backend and outcome"
    );
    describe_histogram!(
        name("backend_duration_seconds"),
        Unit::Seconds,
        "Retrieval backend latency in seconds"
    );
    describe_counter!(
        name("retrieval_degraded_total"),
        Unit::Count,
        "Hybrid searches answered by a single backend"
    );

    describe_counter!(
        name("model_calls_total"),
        Unit::Count,
        "Model calls by stage and outcome"
    );
    describe_histogram!(
        name("model_duration_seconds"),
        Unit::Seconds,
        "Model call latency in seconds"
    );

    describe_counter!(
        name("stage_fail_open_total"),
        Unit::Count,
        "Optional stages that fell back to their input"
    );
    describe_counter!(
        name("intents_total"),
        Unit::Count,
        "Classified turns by intent and whether the fallback applied"
    );

    describe_histogram!(
        name("answer_duration_seconds"),
        Unit::Seconds,
        "End-to-end chat turn latency by route"
    );

    describe_counter!(name("cache_hits_total"), Unit::Count, "Total cache hits");
    describe_counter!(name("cache_misses_total"), Unit::Count, "Total cache misses");

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            name("requests_total"),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            name("request_duration_seconds"),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one retrieval backend query
pub fn record_backend(backend: &'static str, elapsed: Duration, outcome: &'static str) {
    counter!(name("backend_queries_total"), "backend" => backend, "outcome" => outcome)
        .increment(1);
    histogram!(name("backend_duration_seconds"), "backend" => backend)
        .record(elapsed.as_secs_f64());
}

/// Record a hybrid search that lost one of its backends
pub fn record_degraded(failed_backend: &'static str) {
    counter!(name("retrieval_degraded_total"), "failed" => failed_backend).increment(1);
}

/// Record a model call (embedding, rerank, classify, filter, generate, rewrite)
pub fn record_model_call(stage: &'static str, elapsed: Duration, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(name("model_calls_total"), "stage" => stage, "status" => status).increment(1);
    if success {
        histogram!(name("model_duration_seconds"), "stage" => stage)
            .record(elapsed.as_secs_f64());
    }
}

/// Record an optional stage returning its input unchanged after a failure
pub fn record_fail_open(stage: &'static str, reason: &'static str) {
    counter!(name("stage_fail_open_total"), "stage" => stage, "reason" => reason).increment(1);
}

/// Record the intent that drove routing
pub fn record_intent(intent: &'static str, fallback: bool) {
    counter!(
        name("intents_total"),
        "intent" => intent,
        "fallback" => if fallback { "true" } else { "false" }
    )
    .increment(1);
}

/// Record one completed chat turn
pub fn record_answer(route: &'static str, elapsed: Duration, degraded: bool) {
    histogram!(
        name("answer_duration_seconds"),
        "route" => route,
        "degraded" => if degraded { "true" } else { "false" }
    )
    .record(elapsed.as_secs_f64());
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &'static str) {
    if hit {
        counter!(name("cache_hits_total"), "cache" => cache_name).increment(1);
    } else {
        counter!(name("cache_misses_total"), "cache" => cache_name).increment(1);
    }
}
