//! Chat pipeline
//!
//! One turn flows through:
//! 1. Intent classification and routing
//! 2. For retrieval routes: optional rewrite, hybrid retrieval, rerank,
//!    relevance filter, then grounded composition (or the bare passages when
//!    generation is switched off)
//! 3. For direct routes: persona generation, no sources
//!
//! Every stage takes its input by value and hands a new value to the next.
//! The whole turn runs under a request timeout and can be aborted.

use crate::composer::AnswerComposer;
use crate::rewriter::QueryRewriter;
use crate::router::{DialogueRouter, RoutingDecision};
use futures::future::{abortable, AbortHandle, Aborted};
use lexforge_common::cache::{keys, AnswerStore};
use lexforge_common::config::AppConfig;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::llm::LanguageModel;
use lexforge_common::models::{Answer, ChatMessage, ConversationTurn, FusedResult, Route};
use lexforge_common::Embedder;
use lexforge_search::{
    CrossEncoder, HybridResults, HybridRetriever, KeywordIndex, RankFusion, RelevanceFilter,
    Reranker, VectorStore,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Capability backends the pipeline is assembled from
pub struct Backends {
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub index: Arc<dyn KeywordIndex>,

    /// Cross-encoder; reranking also needs `retrieval.enable_rerank`
    pub cross_encoder: Option<Arc<dyn CrossEncoder>>,

    pub cache: Option<Arc<dyn AnswerStore>>,
}

/// Per-turn limits
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Prior messages the router and context routes see
    pub history_window: usize,

    /// Fused candidates handed to the reranker
    pub candidate_pool: usize,

    pub request_timeout: Duration,

    /// Compose an answer on retrieval routes
    pub generate: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            history_window: 2,
            candidate_pool: 20,
            request_timeout: Duration::from_secs(90),
            generate: true,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_window: config.pipeline.history_window,
            candidate_pool: config.retrieval.fused_top_k,
            request_timeout: config.request_timeout(),
            generate: config.pipeline.enable_generation,
        }
    }
}

pub struct ChatPipeline {
    router: DialogueRouter,
    rewriter: Option<QueryRewriter>,
    retriever: HybridRetriever,
    reranker: Reranker,
    filter: Option<RelevanceFilter>,
    composer: AnswerComposer,
    cache: Option<Arc<dyn AnswerStore>>,
    settings: PipelineSettings,
}

impl ChatPipeline {
    /// Assemble the pipeline; optional stages follow their config flags
    pub fn from_config(config: &AppConfig, backends: Backends) -> Result<Self> {
        let retriever = HybridRetriever::new(
            backends.embedder,
            backends.store,
            backends.index,
            &config.retrieval,
        )?;

        let reranker = match backends.cross_encoder {
            Some(encoder) if config.retrieval.enable_rerank => {
                Reranker::new(encoder, config.retrieval.rerank_candidates)
            }
            _ => Reranker::disabled(),
        };

        let filter = config
            .retrieval
            .enable_relevance_filter
            .then(|| RelevanceFilter::new(backends.model.clone()));

        let rewriter = config
            .pipeline
            .rewrite_query
            .then(|| QueryRewriter::new(backends.model.clone()));

        info!(
            rerank = reranker.is_enabled(),
            relevance_filter = filter.is_some(),
            rewrite = rewriter.is_some(),
            generation = config.pipeline.enable_generation,
            cache = backends.cache.is_some(),
            alpha = retriever.fusion().alpha(),
            "Chat pipeline assembled"
        );

        Ok(Self {
            router: DialogueRouter::new(backends.model.clone(), config.pipeline.fallback_intent),
            rewriter,
            retriever,
            reranker,
            filter,
            composer: AnswerComposer::new(backends.model),
            cache: backends.cache,
            settings: PipelineSettings::from_config(config),
        })
    }

    /// Fusion parameters in effect, reported by the search endpoint
    pub fn fusion(&self) -> &RankFusion {
        self.retriever.fusion()
    }

    /// Answer one chat turn.
    ///
    /// Returns [`AppError::Timeout`] when the turn exceeds the request timeout;
    /// no partial answer is ever returned.
    #[instrument(skip(self, query, history), fields(history_len = history.len()))]
    pub async fn answer(&self, query: &str, history: &[ChatMessage], top_k: usize) -> Result<Answer> {
        validate_request(query, top_k)?;

        let timeout = self.settings.request_timeout;
        match tokio::time::timeout(timeout, self.run(query.trim(), history, top_k)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Chat turn timed out");
                Err(AppError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Like [`answer`](Self::answer), with a handle that cancels the turn.
    ///
    /// An aborted turn resolves to [`AppError::Cancelled`]; in-flight backend
    /// calls are dropped.
    pub fn answer_abortable<'a>(
        &'a self,
        query: &'a str,
        history: &'a [ChatMessage],
        top_k: usize,
    ) -> (impl Future<Output = Result<Answer>> + Send + 'a, AbortHandle) {
        let (turn, handle) = abortable(self.answer(query, history, top_k));
        let turn = async move {
            match turn.await {
                Ok(result) => result,
                Err(Aborted) => {
                    info!("Chat turn cancelled");
                    Err(AppError::Cancelled)
                }
            }
        };
        (turn, handle)
    }

    /// Retrieval stages only: hybrid search, fusion and rerank
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<HybridResults> {
        validate_request(query, top_k)?;
        self.retrieve(query.trim(), query.trim(), top_k).await
    }

    async fn run(&self, query: &str, history: &[ChatMessage], top_k: usize) -> Result<Answer> {
        let start = Instant::now();
        let turn = ConversationTurn::new(query, history, self.settings.history_window);
        let decision = self.router.route(&turn).await;

        let answer = match decision.route {
            Route::RetrievalWithoutContext => {
                self.grounded(turn.utterance.clone(), top_k, decision).await?
            }
            Route::RetrievalWithContext => self.grounded(turn.transcript(), top_k, decision).await?,
            Route::DirectWithContext => self.direct(&turn.transcript(), decision).await?,
            Route::DirectWithoutContext => self.direct(&turn.utterance_only(), decision).await?,
        };

        lexforge_common::metrics::record_answer(decision.route.as_str(), start.elapsed(), answer.degraded);
        info!(
            intent = %answer.intent,
            route = answer.route.as_str(),
            sources = answer.sources.len(),
            degraded = answer.degraded,
            cached = answer.cached,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat turn answered"
        );

        Ok(answer)
    }

    async fn retrieve(&self, search_text: &str, question: &str, top_k: usize) -> Result<HybridResults> {
        let pool = self.settings.candidate_pool.max(top_k);
        let fused = self.retriever.retrieve(search_text, pool).await?;

        let results = self.reranker.rerank(question, fused.results, top_k).await;
        Ok(HybridResults { results, ..fused })
    }

    async fn grounded(&self, question: String, top_k: usize, decision: RoutingDecision) -> Result<Answer> {
        let search_text = match &self.rewriter {
            Some(rewriter) => rewriter.rewrite(&question).await,
            None => question.clone(),
        };

        let retrieved = self.retrieve(&search_text, &question, top_k).await?;
        let degraded = retrieved.is_degraded();

        let passages = match &self.filter {
            Some(filter) => filter.filter(&question, retrieved.results).await.into_candidates(),
            None => retrieved.results,
        };

        if !self.settings.generate {
            return Ok(passages_only(passages, decision, degraded));
        }

        let cache_key = (!passages.is_empty()).then(|| answer_key(&question, &passages));
        if let Some(mut hit) = self.cached(cache_key.as_deref()).await {
            hit.intent = decision.intent;
            hit.intent_fallback = decision.fallback;
            hit.route = decision.route;
            hit.degraded = degraded;
            hit.cached = true;
            return Ok(hit);
        }

        let documents = passages.into_iter().map(FusedResult::into_document).collect();
        let composed = self.composer.compose(&question, documents).await?;

        let answer = Answer {
            text: composed.text,
            sources: composed.sources,
            intent: decision.intent,
            intent_fallback: decision.fallback,
            route: decision.route,
            degraded,
            cached: false,
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            if let Err(e) = cache.put(&key, &answer).await {
                warn!(error = %e, "Failed to cache answer");
            }
        }

        Ok(answer)
    }

    async fn direct(&self, input: &str, decision: RoutingDecision) -> Result<Answer> {
        let text = self.composer.direct(input).await?;
        Ok(Answer {
            text,
            sources: Vec::new(),
            intent: decision.intent,
            intent_fallback: decision.fallback,
            route: decision.route,
            degraded: false,
            cached: false,
        })
    }

    async fn cached(&self, key: Option<&str>) -> Option<Answer> {
        let (cache, key) = (self.cache.as_ref()?, key?);
        match cache.get(key).await {
            Ok(hit) => {
                lexforge_common::metrics::record_cache(hit.is_some(), "answer");
                hit
            }
            Err(e) => {
                warn!(error = %e, "Answer cache lookup failed");
                None
            }
        }
    }
}

/// Retrieval-only answer: the final ordered passages with no generated text
fn passages_only(passages: Vec<FusedResult>, decision: RoutingDecision, degraded: bool) -> Answer {
    let text = if passages.is_empty() {
        lexforge_common::INSUFFICIENT_INFORMATION.to_string()
    } else {
        String::new()
    };

    Answer {
        text,
        sources: passages.into_iter().map(FusedResult::into_document).collect(),
        intent: decision.intent,
        intent_fallback: decision.fallback,
        route: decision.route,
        degraded,
        cached: false,
    }
}

/// Cache key over the question and the exact passages sent to the generator
fn answer_key(question: &str, passages: &[FusedResult]) -> String {
    keys::answer(
        question,
        passages
            .iter()
            .map(|p| (p.id(), p.rerank_score.map(f64::from).unwrap_or(p.rrf_score))),
    )
}

fn validate_request(query: &str, top_k: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(AppError::validation("query", "query must not be empty"));
    }
    if top_k == 0 {
        return Err(AppError::validation("top_k", "top_k must be positive"));
    }
    Ok(())
}
