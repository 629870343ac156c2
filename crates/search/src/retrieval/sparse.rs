//! Sparse (keyword) search over an Elasticsearch inverted index
//!
//! Passages are pre-segmented at ingestion time; the query is normalized
//! locally and segmented by the configured search analyzer (`ik_smart` for
//! Chinese corpora) so both sides tokenize the same way.

use super::{guarded, validate_search, Backend, SearchFilter, SearchOutcome};
use async_trait::async_trait;
use chrono::NaiveDate;
use lexforge_common::config::ElasticsearchConfig;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::Document;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Keyword / inverted index
#[async_trait]
pub trait KeywordIndex: Send + Sync {
    /// Up to `k` documents matching `query`, best first, with backend scores
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(Document, f32)>>;
}

/// Collapse whitespace and drop punctuation that only adds noise terms.
///
/// CJK text is left intact for the analyzer to segment.
pub fn normalize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else if c.is_whitespace() || c.is_ascii_punctuation() || is_cjk_punctuation(c) {
                ' '
            } else {
                c
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_cjk_punctuation(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'   // CJK symbols and punctuation
        | '\u{FF01}'..='\u{FF0F}' // full-width ASCII punctuation
        | '\u{FF1A}'..='\u{FF20}'
        | '\u{FF3B}'..='\u{FF40}'
        | '\u{FF5B}'..='\u{FF65}'
        | '\u{2018}'..='\u{201F}' // curly quotes
        | '\u{2026}'              // ellipsis
    )
}

/// Keyword search with local query normalization
pub struct SparseSearch {
    index: Arc<dyn KeywordIndex>,
    filter: SearchFilter,
    timeout: Duration,
}

impl SparseSearch {
    pub fn new(index: Arc<dyn KeywordIndex>, filter: SearchFilter, timeout: Duration) -> Self {
        Self {
            index,
            filter,
            timeout,
        }
    }

    /// Ranked candidates for `query`; index failures degrade
    pub async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome> {
        validate_search(query, k)?;

        let normalized = normalize_query(query);
        if normalized.is_empty() {
            // Punctuation only: nothing to match, not a backend failure
            return Ok(SearchOutcome::Found(Vec::new()));
        }

        let call = self.index.search(&normalized, k, &self.filter);
        Ok(guarded(Backend::Sparse, self.timeout, k, call).await)
    }
}

/// Elasticsearch `_search` client
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: PassageSource,
}

/// Stored passage fields as written by the ingestion job
#[derive(Deserialize)]
struct PassageSource {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    content: String,
    /// Unsegmented text, preferred over the segmented `content`
    #[serde(default)]
    original_content: Option<String>,
    #[serde(default)]
    document_name: String,
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    effective_date: Option<String>,
    #[serde(default)]
    is_effective: bool,
}

impl Hit {
    fn into_scored(self) -> (Document, f32) {
        let source = self.source;
        let id = source.uuid.filter(|u| !u.is_empty()).unwrap_or(self.id);
        let content = source
            .original_content
            .filter(|c| !c.is_empty())
            .unwrap_or(source.content);
        let effective_date = source
            .effective_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d), "%Y-%m-%d").ok());

        let document = Document {
            id,
            content,
            source_name: source.document_name,
            chapter: source.chapter.filter(|c| !c.is_empty()),
            section: source.section.filter(|s| !s.is_empty()),
            is_effective: source.is_effective,
            effective_date,
        };
        (document, self.score.unwrap_or(0.0))
    }
}

impl ElasticsearchIndex {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create Elasticsearch client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn build_body(&self, query: &str, k: usize, filter: &SearchFilter) -> serde_json::Value {
        let mut filters = Vec::new();
        if filter.effective_only {
            filters.push(json!({ "term": { "is_effective": true } }));
        }

        json!({
            "size": k,
            "query": {
                "bool": {
                    "must": [{
                        "match": {
                            "content": {
                                "query": query,
                                "analyzer": self.config.analyzer,
                                "operator": "or"
                            }
                        }
                    }],
                    "filter": filters
                }
            }
        })
    }

    /// Check cluster reachability
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(self.config.url.trim_end_matches('/')))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::SearchBackend {
                backend: "elasticsearch".to_string(),
                message: format!("ping returned {}", response.status()),
            })
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }
}

#[async_trait]
impl KeywordIndex for ElasticsearchIndex {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(Document, f32)>> {
        let url = format!(
            "{}/{}/_search",
            self.config.url.trim_end_matches('/'),
            self.config.index
        );

        let response = self
            .authorized(self.client.post(&url))
            .json(&self.build_body(query, k, filter))
            .send()
            .await
            .map_err(|e| AppError::SearchBackend {
                backend: "elasticsearch".to_string(),
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SearchBackend {
                backend: "elasticsearch".to_string(),
                message: format!("Search error {}: {}", status, body),
            });
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| AppError::SearchBackend {
            backend: "elasticsearch".to_string(),
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(parsed.hits.hits.into_iter().map(Hit::into_scored).collect())
    }
}
