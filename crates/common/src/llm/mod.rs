//! Generative language-model abstraction
//!
//! Every model-backed stage (intent classification, relevance filtering,
//! query rewriting, answer generation) goes through [`LanguageModel`], so the
//! pipeline can run against any OpenAI-compatible chat endpoint or a scripted
//! fake in tests.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::retry::{classify_http_error, with_retry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A single-turn request to the model
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// Pipeline stage issuing the call, used for metrics and logs
    pub stage: &'static str,

    /// System instruction
    pub system: String,

    /// User message
    pub user: String,
}

impl Prompt {
    pub fn new(stage: &'static str, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the raw completion text for `prompt`
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Client for OpenAI-compatible chat-completions endpoints
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    config: LlmConfig,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create LLM HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    async fn call(&self, prompt: &Prompt) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_http_error(e, self.timeout, false))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(AppError::ServiceUnavailable {
                    message: format!("LLM API {}: {}", status, body),
                });
            }
            return Err(AppError::ModelError {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::ModelError {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::ModelError {
                message: "Empty response from LLM".to_string(),
            })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let start = Instant::now();
        let result = with_retry(prompt.stage, self.config.max_retries, || self.call(prompt)).await;

        crate::metrics::record_model_call(prompt.stage, start.elapsed(), result.is_ok());
        tracing::debug!(
            stage = prompt.stage,
            model = %self.config.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "LLM call finished"
        );

        result
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
