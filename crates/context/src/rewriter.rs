//! Hypothetical-document query rewriting
//!
//! Legal questions are phrased very differently from the statutes that answer
//! them. Searching with a short model-written reference passage instead of
//! the raw question brings the query closer to the corpus vocabulary.

use crate::prompts;
use lexforge_common::llm::LanguageModel;
use std::sync::Arc;

pub struct QueryRewriter {
    model: Arc<dyn LanguageModel>,
}

impl QueryRewriter {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Search text for `query`; the query itself when rewriting fails
    pub async fn rewrite(&self, query: &str) -> String {
        match self.model.complete(&prompts::hypothetical_document(query)).await {
            Ok(passage) if !passage.trim().is_empty() => {
                tracing::debug!(chars = passage.chars().count(), "Query rewritten");
                passage.trim().to_string()
            }
            Ok(_) => {
                tracing::warn!("Query rewriter returned nothing, searching with the query");
                lexforge_common::metrics::record_fail_open("rewrite", "empty");
                query.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Query rewriting failed, searching with the query");
                lexforge_common::metrics::record_fail_open("rewrite", "backend");
                query.to_string()
            }
        }
    }
}
