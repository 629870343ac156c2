//! LexForge API Gateway
//!
//! HTTP entry point for the legal Q&A pipeline:
//! - `POST /v1/chat`: routed, retrieval-grounded answers with citations
//! - `POST /v1/search`: hybrid retrieval with rank diagnostics
//! - Health and readiness probes
//! - Prometheus metrics on a separate port

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use lexforge_common::{
    cache::{AnswerStore, Cache, MemoryCache},
    config::AppConfig,
    db::DbPool,
    embeddings::create_embedder,
    llm::{ChatCompletionsClient, LanguageModel},
    metrics::{self, LATENCY_BUCKETS, MODEL_BUCKETS},
    telemetry, VERSION,
};
use lexforge_context::{Backends, ChatPipeline};
use lexforge_search::{CrossEncoder, ElasticsearchIndex, HttpCrossEncoder, PgVectorStore};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Answers kept when Redis cannot be reached
const IN_PROCESS_CACHE_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<ChatPipeline>,
    pub dependencies: Arc<Dependencies>,
}

/// External services probed by the readiness check
#[derive(Default)]
pub struct Dependencies {
    pub db: Option<Arc<DbPool>>,
    pub search_index: Option<Arc<ElasticsearchIndex>>,
    pub cache: Option<Arc<Cache>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // An explicit file replaces the layered config/ lookup
    let config = match std::env::var("LEXFORGE_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)?,
        Err(_) => AppConfig::load()?,
    };
    telemetry::init(&config.observability);
    config.validate()?;

    info!(
        version = VERSION,
        service = %config.observability.service_name,
        "Starting LexForge API Gateway"
    );

    install_metrics_exporter(&config)?;

    let shutdown_timeout = config.shutdown_timeout();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = build_state(Arc::new(config)).await?;
    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Hard stop if in-flight turns do not drain in time
            tokio::spawn(async move {
                tokio::time::sleep(shutdown_timeout).await;
                warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Graceful shutdown timed out, exiting"
                );
                std::process::exit(1);
            });
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Exporter settings shared by every series: buckets and the `service` label
fn metrics_builder(config: &AppConfig) -> anyhow::Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new()
        .add_global_label("service", config.observability.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_model_duration_seconds", metrics::METRICS_PREFIX)),
            MODEL_BUCKETS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)?)
}

fn install_metrics_exporter(config: &AppConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));

    metrics_builder(config)?.with_http_listener(addr).install()?;

    metrics::register_metrics();
    info!(port = config.observability.metrics_port, "Prometheus exporter listening");
    Ok(())
}

/// Connect every backend and assemble the chat pipeline
async fn build_state(config: Arc<AppConfig>) -> anyhow::Result<AppState> {
    info!("Connecting to database...");
    let db = Arc::new(DbPool::new(&config.database).await?);
    let store = Arc::new(PgVectorStore::new(db.clone(), &config.database.passage_table)?);

    let search_index = Arc::new(ElasticsearchIndex::new(config.elasticsearch.clone())?);
    let embedder = create_embedder(&config.embedding)?;
    let model: Arc<dyn LanguageModel> = Arc::new(ChatCompletionsClient::new(config.llm.clone())?);

    let cross_encoder: Option<Arc<dyn CrossEncoder>> = if config.retrieval.enable_rerank {
        Some(Arc::new(HttpCrossEncoder::new(config.reranker.clone())?))
    } else {
        None
    };

    let (answer_store, redis) = if config.cache.enabled {
        match Cache::new(&config.cache).await {
            Ok(cache) => {
                let cache = Arc::new(cache);
                (Some(cache.clone() as Arc<dyn AnswerStore>), Some(cache))
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, using in-process answer cache");
                let store = Arc::new(MemoryCache::new(IN_PROCESS_CACHE_CAPACITY));
                (Some(store as Arc<dyn AnswerStore>), None)
            }
        }
    } else {
        (None, None)
    };

    let pipeline = ChatPipeline::from_config(
        &config,
        Backends {
            model,
            embedder,
            store,
            index: search_index.clone(),
            cross_encoder,
            cache: answer_store,
        },
    )?;

    Ok(AppState {
        config,
        pipeline: Arc::new(pipeline),
        dependencies: Arc::new(Dependencies {
            db: Some(db),
            search_index: Some(search_index),
            cache: redis,
        }),
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let max_concurrent = state.config.server.max_concurrent_requests.max(1);

    let api_routes = Router::new()
        // Probes
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Pipeline
        .route("/chat", post(handlers::chat::chat))
        .route("/search", post(handlers::search::search))
        .route_layer(axum::middleware::from_fn(middleware::track_requests));

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(max_concurrent))
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
