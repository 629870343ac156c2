//! End-to-end chat turns against deterministic fake backends

use async_trait::async_trait;
use lexforge_common::cache::{AnswerStore, MemoryCache};
use lexforge_common::config::AppConfig;
use lexforge_common::embeddings::MockEmbedder;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::llm::{LanguageModel, Prompt};
use lexforge_common::models::{ChatMessage, Intent, Route};
use lexforge_common::{Document, INSUFFICIENT_INFORMATION};
use lexforge_context::{Backends, ChatPipeline};
use lexforge_search::{CrossEncoder, KeywordIndex, SearchFilter, VectorStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers by stage and records every prompt it receives
struct FakeModel {
    intent: &'static str,
    answer: &'static str,
    verdict: &'static str,
    delay: Option<Duration>,
    prompts: Mutex<Vec<Prompt>>,
}

impl FakeModel {
    fn new(intent: &'static str, answer: &'static str) -> Self {
        Self {
            intent,
            answer,
            verdict: "[]",
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn stages(&self) -> Vec<&'static str> {
        self.prompts.lock().unwrap().iter().map(|p| p.stage).collect()
    }

    fn prompt(&self, stage: &str) -> Prompt {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.stage == stage)
            .cloned()
            .unwrap_or_else(|| panic!("no {} prompt", stage))
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(match prompt.stage {
            "classify" => format!("<U0>\n<utterance_intent>{}</utterance_intent>\n</U0>", self.intent),
            "relevance_filter" => self.verdict.to_string(),
            "generate" | "generate_direct" => self.answer.to_string(),
            _ => String::new(),
        })
    }

    fn model_name(&self) -> &str {
        "fake"
    }
}

/// Serves a fixed ranked list (or an outage) and counts calls
struct FakeBackend {
    ids: Option<Vec<&'static str>>,
    calls: AtomicUsize,
}

impl FakeBackend {
    fn serving(ids: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            ids: Some(ids.to_vec()),
            calls: AtomicUsize::new(0),
        })
    }

    fn down() -> Arc<Self> {
        Arc::new(Self {
            ids: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hits(&self) -> Result<Vec<(Document, f32)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.ids {
            Some(ids) => Ok(ids
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    let doc = Document::new(*id, format!("content of {}", id)).with_source("Company Law");
                    (doc, 10.0 - i as f32)
                })
                .collect()),
            None => Err(AppError::ServiceUnavailable {
                message: "connection refused".into(),
            }),
        }
    }
}

#[async_trait]
impl VectorStore for FakeBackend {
    async fn nearest(&self, _: &[f32], _: usize, _: &SearchFilter) -> Result<Vec<(Document, f32)>> {
        self.hits()
    }
}

#[async_trait]
impl KeywordIndex for FakeBackend {
    async fn search(&self, _: &str, _: usize, _: &SearchFilter) -> Result<Vec<(Document, f32)>> {
        self.hits()
    }
}

/// Scores later passages higher, reversing the fused order
struct ReversingEncoder;

#[async_trait]
impl CrossEncoder for ReversingEncoder {
    async fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        Ok((0..passages.len()).map(|i| i as f32).collect())
    }

    fn model_name(&self) -> &str {
        "reversing"
    }
}

struct Harness {
    model: Arc<FakeModel>,
    dense: Arc<FakeBackend>,
    sparse: Arc<FakeBackend>,
    pipeline: ChatPipeline,
}

fn harness(model: FakeModel, dense: Arc<FakeBackend>, sparse: Arc<FakeBackend>) -> Harness {
    harness_with(model, dense, sparse, AppConfig::default(), None, None)
}

fn harness_with(
    model: FakeModel,
    dense: Arc<FakeBackend>,
    sparse: Arc<FakeBackend>,
    config: AppConfig,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    cache: Option<Arc<dyn AnswerStore>>,
) -> Harness {
    let model = Arc::new(model);
    let pipeline = ChatPipeline::from_config(
        &config,
        Backends {
            model: model.clone(),
            embedder: Arc::new(MockEmbedder::new(8)),
            store: dense.clone(),
            index: sparse.clone(),
            cross_encoder,
            cache,
        },
    )
    .unwrap();

    Harness {
        model,
        dense,
        sparse,
        pipeline,
    }
}

fn source_ids(sources: &[Document]) -> Vec<&str> {
    sources.iter().map(|d| d.id.as_str()).collect()
}

#[tokio::test]
async fn test_fused_order_reaches_generator() {
    let h = harness(
        FakeModel::new("DIFFERENT_QUESTION", "Transfers need consent [2]. See [4] and [9]."),
        FakeBackend::serving(&["D1", "D3", "D5"]),
        FakeBackend::serving(&["D3", "D2", "D1"]),
    );

    let answer = tokio_test::assert_ok!(h.pipeline.answer("Can I transfer my shares?", &[], 10).await);

    assert_eq!(answer.route, Route::RetrievalWithoutContext);
    assert_eq!(answer.intent, Intent::NewTopic);
    assert!(!answer.degraded);
    assert!(!answer.intent_fallback);
    assert_eq!(answer.text, "Transfers need consent [2]. See [4] and [9].");
    // D1, D3, D5, D2 in fused order; [9] is out of range
    assert_eq!(source_ids(&answer.sources), vec!["D3", "D2"]);

    let prompt = h.model.prompt("generate").user;
    let positions: Vec<usize> = ["[1] Company Law:\ncontent of D1", "[2] Company Law:\ncontent of D3",
        "[3] Company Law:\ncontent of D5", "[4] Company Law:\ncontent of D2"]
        .iter()
        .map(|needle| prompt.find(needle).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(prompt.starts_with("My question is: Can I transfer my shares?"));
}

#[tokio::test]
async fn test_dense_outage_degrades_to_sparse_only() {
    let h = harness(
        FakeModel::new("DIFFERENT_QUESTION", "See [1][2]."),
        FakeBackend::down(),
        FakeBackend::serving(&["S1", "S2"]),
    );

    let answer = h.pipeline.answer("Who approves a pledge?", &[], 10).await.unwrap();

    assert!(answer.degraded);
    assert_eq!(source_ids(&answer.sources), vec!["S1", "S2"]);
    assert_eq!(h.dense.calls(), 1);
    assert_eq!(h.sparse.calls(), 1);

    let results = h.pipeline.search("Who approves a pledge?", 10).await.unwrap();
    assert!(results.dense_degraded.is_some());
    assert!((results.results[0].rrf_score - 0.3 / 61.0).abs() < 1e-12);
    assert!((results.results[1].rrf_score - 0.3 / 62.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_casual_chat_skips_retrieval() {
    let h = harness(
        FakeModel::new("CASUAL_CHAT", "Hello, how can I help you today?"),
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
    );

    let answer = h.pipeline.answer("hello", &[], 10).await.unwrap();

    assert_eq!(answer.route, Route::DirectWithoutContext);
    assert_eq!(answer.text, "Hello, how can I help you today?");
    assert!(answer.sources.is_empty());
    assert_eq!(h.dense.calls(), 0);
    assert_eq!(h.sparse.calls(), 0);
    assert_eq!(h.model.stages(), vec!["classify", "generate_direct"]);
    assert_eq!(h.model.prompt("generate_direct").user, "Human: hello");
}

#[tokio::test]
async fn test_additional_comment_answers_with_context() {
    let h = harness(
        FakeModel::new("ADDITIONAL_COMMENT", "Glad that helps."),
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
    );
    let history = vec![
        ChatMessage::user("Do we need board approval?"),
        ChatMessage::assistant("Yes, under the articles."),
    ];

    let answer = h.pipeline.answer("OK, thanks", &history, 10).await.unwrap();

    assert_eq!(answer.route, Route::DirectWithContext);
    assert_eq!(h.dense.calls() + h.sparse.calls(), 0);
    assert_eq!(
        h.model.prompt("generate_direct").user,
        "Human: Do we need board approval?\nAssistant: Yes, under the articles.\nHuman: OK, thanks"
    );
}

#[tokio::test]
async fn test_unparseable_intent_falls_back_to_context_retrieval() {
    let h = harness(
        FakeModel::new("NOT_A_LABEL", "Per [1]."),
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
    );
    let history = vec![ChatMessage::user("q1"), ChatMessage::assistant("a1")];

    let answer = h.pipeline.answer("and the penalty?", &history, 10).await.unwrap();

    assert!(answer.intent_fallback);
    assert_eq!(answer.intent, Intent::Continuation);
    assert_eq!(answer.route, Route::RetrievalWithContext);
    assert!(h
        .model
        .prompt("generate")
        .user
        .starts_with("My question is: Human: q1\nAssistant: a1\nHuman: and the penalty?"));
}

#[tokio::test]
async fn test_both_backends_down_is_an_error() {
    let h = harness(
        FakeModel::new("DIFFERENT_QUESTION", "unused"),
        FakeBackend::down(),
        FakeBackend::down(),
    );
    let err = tokio_test::assert_err!(h.pipeline.answer("q", &[], 10).await);
    assert!(matches!(err, AppError::RetrievalUnavailable { .. }));
    assert!(!h.model.stages().contains(&"generate"));
}

#[tokio::test]
async fn test_empty_corpus_gives_insufficient_information() {
    let h = harness(
        FakeModel::new("DIFFERENT_QUESTION", "invented answer"),
        FakeBackend::serving(&[]),
        FakeBackend::serving(&[]),
    );
    let answer = h.pipeline.answer("q", &[], 10).await.unwrap();
    assert_eq!(answer.text, INSUFFICIENT_INFORMATION);
    assert!(answer.sources.is_empty());
    assert!(!answer.degraded);
    assert_eq!(h.model.stages(), vec!["classify"]);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let h = harness(
        FakeModel::new("DIFFERENT_QUESTION", "unused"),
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
    );
    assert!(matches!(h.pipeline.answer("  ", &[], 10).await, Err(AppError::Validation { .. })));
    assert!(matches!(h.pipeline.answer("q", &[], 0).await, Err(AppError::Validation { .. })));
    assert!(h.model.stages().is_empty());
}

#[tokio::test]
async fn test_rerank_and_filter_shape_the_passages() {
    let mut config = AppConfig::default();
    config.retrieval.enable_relevance_filter = true;
    let mut model = FakeModel::new("DIFFERENT_QUESTION", "Per [1].");
    model.verdict = "```json\n[1]\n```";

    let h = harness_with(
        model,
        FakeBackend::serving(&["D1", "D2", "D3"]),
        FakeBackend::serving(&["D1", "D2", "D3"]),
        config,
        Some(Arc::new(ReversingEncoder)),
        None,
    );

    let answer = h.pipeline.answer("q", &[], 2).await.unwrap();

    // Reranker reverses to D3, D2, D1 and keeps two; the filter keeps the first
    assert_eq!(source_ids(&answer.sources), vec!["D3"]);
    assert_eq!(h.model.stages(), vec!["classify", "relevance_filter", "generate"]);
    assert!(!h.model.prompt("generate").user.contains("content of D2"));
}

#[tokio::test]
async fn test_generation_switched_off_returns_ordered_passages() {
    let mut config = AppConfig::default();
    config.pipeline.enable_generation = false;
    let cache = Arc::new(MemoryCache::new(100));

    let h = harness_with(
        FakeModel::new("DIFFERENT_QUESTION", "unused"),
        FakeBackend::serving(&["D1", "D3", "D5"]),
        FakeBackend::serving(&["D3", "D2", "D1"]),
        config,
        None,
        Some(cache.clone()),
    );

    let answer = h.pipeline.answer("Can I transfer my shares?", &[], 10).await.unwrap();

    assert_eq!(answer.route, Route::RetrievalWithoutContext);
    assert!(answer.text.is_empty());
    assert_eq!(source_ids(&answer.sources), vec!["D1", "D3", "D5", "D2"]);
    assert_eq!(h.model.stages(), vec!["classify"]);
    assert_eq!(cache.len().await, 0);
}

#[tokio::test]
async fn test_generation_switched_off_still_answers_direct_routes() {
    let mut config = AppConfig::default();
    config.pipeline.enable_generation = false;
    let h = harness_with(
        FakeModel::new("CASUAL_CHAT", "Hello."),
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
        config,
        None,
        None,
    );

    let answer = h.pipeline.answer("hello", &[], 10).await.unwrap();
    assert_eq!(answer.text, "Hello.");
    assert!(!h.model.stages().contains(&"generate"));
}

#[tokio::test]
async fn test_out_of_range_filter_verdict_keeps_all_passages() {
    let mut config = AppConfig::default();
    config.retrieval.enable_relevance_filter = true;
    let mut model = FakeModel::new("DIFFERENT_QUESTION", "Per [1] and [2].");
    model.verdict = "[0, 5, 7]";

    let h = harness_with(
        model,
        FakeBackend::serving(&["D1", "D2"]),
        FakeBackend::serving(&["D1", "D2"]),
        config,
        None,
        None,
    );

    let answer = h.pipeline.answer("q", &[], 10).await.unwrap();
    assert_ne!(answer.text, INSUFFICIENT_INFORMATION);
    assert_eq!(source_ids(&answer.sources), vec!["D1", "D2"]);
}

#[tokio::test]
async fn test_sparse_switched_off_is_not_degraded() {
    let mut config = AppConfig::default();
    config.retrieval.enable_sparse = false;
    let h = harness_with(
        FakeModel::new("DIFFERENT_QUESTION", "Per [1]."),
        FakeBackend::serving(&["D1", "D2"]),
        FakeBackend::serving(&["S1"]),
        config,
        None,
        None,
    );

    let answer = h.pipeline.answer("q", &[], 10).await.unwrap();
    assert!(!answer.degraded);
    assert_eq!(source_ids(&answer.sources), vec!["D1"]);
    assert_eq!(h.sparse.calls(), 0);
    assert_eq!(h.dense.calls(), 1);
}

#[tokio::test]
async fn test_repeated_question_served_from_cache() {
    let cache = Arc::new(MemoryCache::new(100));
    let h = harness_with(
        FakeModel::new("DIFFERENT_QUESTION", "Per [1]."),
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
        AppConfig::default(),
        None,
        Some(cache.clone()),
    );

    let first = h.pipeline.answer("q", &[], 10).await.unwrap();
    let second = h.pipeline.answer("q", &[], 10).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.text, second.text);
    assert_eq!(first.sources, second.sources);
    assert_eq!(cache.len().await, 1);
    let generations = h.model.stages().iter().filter(|s| **s == "generate").count();
    assert_eq!(generations, 1);
}

#[tokio::test]
async fn test_slow_turn_times_out() {
    let mut config = AppConfig::default();
    config.pipeline.request_timeout_secs = 1;
    let mut model = FakeModel::new("DIFFERENT_QUESTION", "late");
    model.delay = Some(Duration::from_secs(30));

    let h = harness_with(
        model,
        FakeBackend::serving(&["D1"]),
        FakeBackend::serving(&["D1"]),
        config,
        None,
        None,
    );

    let err = h.pipeline.answer("q", &[], 10).await.unwrap_err();
    assert!(matches!(err, AppError::Timeout { timeout_ms: 1000 }));
}

#[tokio::test]
async fn test_aborted_turn_is_cancelled() {
    let mut model = FakeModel::new("DIFFERENT_QUESTION", "late");
    model.delay = Some(Duration::from_secs(30));
    let h = harness(model, FakeBackend::serving(&["D1"]), FakeBackend::serving(&["D1"]));

    let (turn, handle) = h.pipeline.answer_abortable("q", &[], 10);
    let (result, _) = tokio::join!(turn, async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
    });

    assert!(matches!(result, Err(AppError::Cancelled)));
    assert_eq!(h.dense.calls(), 0);
}
