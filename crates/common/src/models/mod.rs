//! Corpus and conversation models shared by the retrieval and dialogue crates
//!
//! Everything here is request-scoped except [`Document`], which mirrors the
//! read-only corpus produced at ingestion time.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable retrievable unit of the corpus (one article or clause)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable opaque identifier shared by both indexes
    pub id: String,

    /// Passage text
    pub content: String,

    /// Name of the source instrument, e.g. "Company Law"
    pub source_name: String,

    /// Chapter label, if the source is structured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,

    /// Section label, if the source is structured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Whether the passage is currently in force
    #[serde(default = "default_effective")]
    pub is_effective: bool,

    /// Date from which the passage applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,
}

fn default_effective() -> bool {
    true
}

impl Document {
    /// Minimal document, mostly useful for fakes and tests
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_name: String::new(),
            chapter: None,
            section: None,
            is_effective: true,
            effective_date: None,
        }
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    /// Human-readable provenance: "source chapter section"
    pub fn citation_label(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if !self.source_name.is_empty() {
            parts.push(&self.source_name);
        }
        if let Some(chapter) = self.chapter.as_deref().filter(|c| !c.is_empty()) {
            parts.push(chapter);
        }
        if let Some(section) = self.section.as_deref().filter(|s| !s.is_empty()) {
            parts.push(section);
        }
        if parts.is_empty() {
            "Unknown source".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// A document as returned by one retrieval backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub document: Document,

    /// Backend-native relevance score (not comparable across backends)
    pub score: f32,

    /// 1-based position in the dense list, `None` when not found there
    pub dense_rank: Option<usize>,

    /// 1-based position in the sparse list, `None` when not found there
    pub sparse_rank: Option<usize>,
}

impl ScoredCandidate {
    pub fn new(document: Document, score: f32) -> Self {
        Self {
            document,
            score,
            dense_rank: None,
            sparse_rank: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }
}

/// A candidate after rank fusion, and optionally after reranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub candidate: ScoredCandidate,

    /// Reciprocal-rank-fusion score; defines the fused order
    pub rrf_score: f64,

    /// Weighted dense term of `rrf_score`
    pub dense_contribution: f64,

    /// Weighted sparse term of `rrf_score`
    pub sparse_contribution: f64,

    /// Cross-encoder score, set only by the reranker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl FusedResult {
    pub fn id(&self) -> &str {
        self.candidate.id()
    }

    pub fn document(&self) -> &Document {
        &self.candidate.document
    }

    pub fn into_document(self) -> Document {
        self.candidate.document
    }
}

/// Speaker of a prior turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversational purpose of the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// A new question on a different topic
    #[serde(rename = "DIFFERENT_QUESTION")]
    NewTopic,
    /// A question that continues the current topic
    #[serde(rename = "RELEVANT_QUESTION")]
    Continuation,
    /// A remark on the previous answer
    AdditionalComment,
    /// Small talk unrelated to the corpus
    CasualChat,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::NewTopic,
        Intent::Continuation,
        Intent::AdditionalComment,
        Intent::CasualChat,
    ];

    /// Label used by the classification prompt
    pub fn label(&self) -> &'static str {
        match self {
            Intent::NewTopic => "DIFFERENT_QUESTION",
            Intent::Continuation => "RELEVANT_QUESTION",
            Intent::AdditionalComment => "ADDITIONAL_COMMENT",
            Intent::CasualChat => "CASUAL_CHAT",
        }
    }

    /// Parse a classifier label; anything else is not an intent
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Intent::ALL
            .into_iter()
            .find(|intent| intent.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Downstream response strategy selected for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Retrieve using the query alone
    RetrievalWithoutContext,
    /// Retrieve using the query plus the last turns
    RetrievalWithContext,
    /// Generate directly from the query plus the last turns
    DirectWithContext,
    /// Generate directly from the query alone
    DirectWithoutContext,
}

impl Route {
    pub fn uses_retrieval(&self) -> bool {
        matches!(
            self,
            Route::RetrievalWithoutContext | Route::RetrievalWithContext
        )
    }

    pub fn uses_context(&self) -> bool {
        matches!(self, Route::RetrievalWithContext | Route::DirectWithContext)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::RetrievalWithoutContext => "retrieval_without_context",
            Route::RetrievalWithContext => "retrieval_with_context",
            Route::DirectWithContext => "direct_with_context",
            Route::DirectWithoutContext => "direct_without_context",
        }
    }
}

/// Per-turn state read by the dialogue router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Current user utterance
    pub utterance: String,

    /// Most recent prior messages, oldest first
    pub window: Vec<ChatMessage>,

    /// Classified intent, once computed
    pub intent: Option<Intent>,
}

impl ConversationTurn {
    /// Build a turn keeping only the last `window` prior messages
    pub fn new(utterance: impl Into<String>, history: &[ChatMessage], window: usize) -> Self {
        let start = history.len().saturating_sub(window);
        Self {
            utterance: utterance.into(),
            window: history[start..].to_vec(),
            intent: None,
        }
    }

    /// Render the window and the utterance as a transcript
    pub fn transcript(&self) -> String {
        let mut lines: Vec<String> = self
            .window
            .iter()
            .map(|msg| match msg.role {
                Role::User => format!("Human: {}", msg.content),
                Role::Assistant => format!("Assistant: {}", msg.content),
            })
            .collect();
        lines.push(format!("Human: {}", self.utterance));
        lines.join("\n")
    }

    /// Render the utterance alone, in transcript form
    pub fn utterance_only(&self) -> String {
        format!("Human: {}", self.utterance)
    }
}

/// Final output of one chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Generated text, exactly as produced by the model
    pub text: String,

    /// Documents actually cited, in candidate-list order
    pub sources: Vec<Document>,

    /// Intent used for routing
    pub intent: Intent,

    /// True when the intent came from the fallback policy
    pub intent_fallback: bool,

    /// Strategy that produced the answer
    pub route: Route,

    /// True when a retrieval stage ran in degraded mode
    pub degraded: bool,

    /// True when served from the answer cache
    #[serde(default)]
    pub cached: bool,
}
