//! Answer composition and citation extraction

use crate::prompts;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::llm::{LanguageModel, Prompt};
use lexforge_common::{Document, INSUFFICIENT_INFORMATION};
use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Generated text plus the passages it cites
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAnswer {
    pub text: String,
    pub sources: Vec<Document>,
}

pub struct AnswerComposer {
    model: Arc<dyn LanguageModel>,
}

impl AnswerComposer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Answer `query` from the numbered `candidates`.
    ///
    /// With no candidates the model is not called and the fixed
    /// insufficient-information answer is returned.
    pub async fn compose(&self, query: &str, candidates: Vec<Document>) -> Result<ComposedAnswer> {
        if candidates.is_empty() {
            tracing::info!("No reference passages, returning insufficient-information answer");
            return Ok(ComposedAnswer {
                text: INSUFFICIENT_INFORMATION.to_string(),
                sources: Vec::new(),
            });
        }

        let text = self
            .generate(prompts::grounded_answer(query, &candidates))
            .await?;
        let sources = extract_citations(&text, &candidates);

        tracing::debug!(
            candidates = candidates.len(),
            cited = sources.len(),
            "Grounded answer composed"
        );

        Ok(ComposedAnswer { text, sources })
    }

    /// Answer in persona without reference passages
    pub async fn direct(&self, input: &str) -> Result<String> {
        self.generate(prompts::direct_answer(input)).await
    }

    async fn generate(&self, prompt: Prompt) -> Result<String> {
        let text = self.model.complete(&prompt).await?;
        if text.trim().is_empty() {
            return Err(AppError::MalformedModelOutput {
                stage: prompt.stage.to_string(),
                message: "empty completion".to_string(),
            });
        }
        Ok(text)
    }
}

/// Documents cited by `[n]` markers in `text`.
///
/// Markers are 1-based positions in `candidates`. Out-of-range markers are
/// ignored; the result is deduplicated and in candidate order.
pub fn extract_citations(text: &str, candidates: &[Document]) -> Vec<Document> {
    let marker = match Regex::new(r"\[(\d+)\]") {
        Ok(marker) => marker,
        Err(_) => return Vec::new(),
    };

    let cited: BTreeSet<usize> = marker
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
        .filter(|n| (1..=candidates.len()).contains(n))
        .collect();

    cited.into_iter().map(|n| candidates[n - 1].clone()).collect()
}
