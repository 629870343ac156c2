//! Chat handler

use axum::{extract::State, Json};
use lexforge_common::errors::Result;
use lexforge_common::models::{Answer, ChatMessage};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use super::invalid;
use crate::AppState;

/// One chat turn
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Prior messages, oldest first
    #[serde(default)]
    #[validate(length(max = 50))]
    pub history: Vec<ChatMessage>,

    /// Passages handed to the generator (defaults to `retrieval.top_k`)
    #[validate(range(min = 1, max = 50))]
    pub top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    #[serde(flatten)]
    pub answer: Answer,
    pub processing_time_ms: u64,
}

/// Answer one turn of a conversation
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let start = Instant::now();
    request.validate().map_err(invalid)?;

    let top_k = request.top_k.unwrap_or(state.config.retrieval.top_k);
    let answer = state
        .pipeline
        .answer(&request.query, &request.history, top_k)
        .await?;

    Ok(Json(ChatResponse {
        answer,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
