//! LexForge dialogue layer
//!
//! Turns one chat turn into an [`Answer`](lexforge_common::Answer):
//! - Intent classification and routing
//! - Optional hypothetical-document query rewriting
//! - Retrieval, reranking and relevance filtering (via `lexforge-search`)
//! - Grounded answer composition with `[n]` citations

pub mod composer;
pub mod pipeline;
pub mod prompts;
pub mod rewriter;
pub mod router;

pub use composer::{extract_citations, AnswerComposer, ComposedAnswer};
pub use pipeline::{Backends, ChatPipeline, PipelineSettings};
pub use rewriter::QueryRewriter;
pub use router::{route_for, DialogueRouter, IntentOutcome, RoutingDecision};
