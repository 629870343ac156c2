//! LLM relevance filter ("reflection")
//!
//! One batched model call picks which candidates directly support an answer.
//! The filter only ever removes candidates and never reorders them. Output
//! that cannot be parsed, and backend failures, leave the list untouched.

use lexforge_common::errors::AppError;
use lexforge_common::llm::{LanguageModel, Prompt};
use lexforge_common::models::FusedResult;
use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

const SYSTEM_PROMPT: &str = "You are a legal research assistant. You check whether \
retrieved legal provisions can directly and accurately answer a user's question.";

/// Result of a filtering pass
#[derive(Debug)]
pub enum FilterOutcome {
    /// The model's verdict was applied. Only an explicit `[]` removes everything.
    Filtered(Vec<FusedResult>),

    /// The model answered but not with a usable selection; input returned as-is
    ParseFailure {
        candidates: Vec<FusedResult>,
        raw: String,
    },

    /// The model call failed; input returned as-is
    BackendFailure {
        candidates: Vec<FusedResult>,
        error: AppError,
    },
}

impl FilterOutcome {
    pub fn into_candidates(self) -> Vec<FusedResult> {
        match self {
            FilterOutcome::Filtered(candidates)
            | FilterOutcome::ParseFailure { candidates, .. }
            | FilterOutcome::BackendFailure { candidates, .. } => candidates,
        }
    }

    pub fn is_fail_open(&self) -> bool {
        !matches!(self, FilterOutcome::Filtered(_))
    }
}

pub struct RelevanceFilter {
    model: Arc<dyn LanguageModel>,
}

impl RelevanceFilter {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Keep the candidates the model judges relevant to `query`
    pub async fn filter(&self, query: &str, candidates: Vec<FusedResult>) -> FilterOutcome {
        if candidates.is_empty() {
            return FilterOutcome::Filtered(candidates);
        }

        let prompt = Prompt::new("relevance_filter", SYSTEM_PROMPT, build_prompt(query, &candidates));
        let start = Instant::now();

        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::error!(error = %error, "Relevance filter call failed, keeping all candidates");
                lexforge_common::metrics::record_fail_open("relevance_filter", "backend");
                return FilterOutcome::BackendFailure { candidates, error };
            }
        };

        let selection = match parse_selection(&raw) {
            Some(selection) => selection,
            None => {
                tracing::warn!(raw = %raw, "Unparseable relevance verdict, keeping all candidates");
                lexforge_common::metrics::record_fail_open("relevance_filter", "parse");
                return FilterOutcome::ParseFailure { candidates, raw };
            }
        };

        let before = candidates.len();
        if !selection.is_empty() && !selection.iter().any(|n| (1..=before).contains(n)) {
            tracing::warn!(raw = %raw, before, "Relevance verdict names no valid passage, keeping all candidates");
            lexforge_common::metrics::record_fail_open("relevance_filter", "parse");
            return FilterOutcome::ParseFailure { candidates, raw };
        }

        let kept: Vec<FusedResult> = candidates
            .into_iter()
            .enumerate()
            .filter(|(i, _)| selection.contains(&(i + 1)))
            .map(|(_, candidate)| candidate)
            .collect();

        tracing::debug!(
            before,
            after = kept.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Relevance filter applied"
        );

        FilterOutcome::Filtered(kept)
    }
}

fn build_prompt(query: &str, candidates: &[FusedResult]) -> String {
    let mut passages = String::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let doc = candidate.document();
        passages.push_str(&format!("[{}] {}\n{}\n\n", i + 1, doc.citation_label(), doc.content));
    }

    format!(
        "## Task ##\n\
        Below are a user's question and {count} retrieved legal provisions. The \
        retrieval is imperfect. Remove every provision that does not help answer \
        the question, keeping only those that directly support an accurate answer.\n\n\
        ## Question ##\n{query}\n\n\
        ## Provisions ##\n{passages}\
        ## Output ##\n\
        Reply with a JSON array of the numbers of the relevant provisions, for \
        example ```json\n[1, 3]\n```. Reply with [] if none is relevant.",
        count = candidates.len(),
        query = query,
        passages = passages,
    )
}

/// Extract the 1-based passage numbers from a model reply.
///
/// Accepts a fenced ```json block or the first bare `[...]` array. Elements
/// must be non-negative integers (or strings holding one); duplicates
/// collapse. Range checks are left to the caller.
pub fn parse_selection(raw: &str) -> Option<BTreeSet<usize>> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").ok();
    let body = match fence
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
    {
        Some(m) => m.as_str(),
        None => {
            let start = raw.find('[')?;
            let end = start + raw[start..].find(']')?;
            &raw[start..=end]
        }
    };

    let values: Vec<serde_json::Value> = serde_json::from_str(body.trim()).ok()?;

    values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
            serde_json::Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        })
        .collect()
}
