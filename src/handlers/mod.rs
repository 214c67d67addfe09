use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, rejection::JsonRejection},
    routing::{get, post},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

mod analyze;
mod chat;
mod health;
mod metrics;
mod questions;
mod suggest;
mod summary;
mod transcript;

pub use analyze::analyze_handler;
pub use chat::chat_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use questions::questions_handler;
pub use suggest::suggest_handler;
pub use summary::summary_handler;
pub use transcript::transcript_handler;

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/transcript", post(transcript_handler))
        .route("/api/summary", post(summary_handler))
        .route("/api/questions", post(questions_handler))
        .route("/api/suggest", post(suggest_handler))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/chat", post(chat_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

// Unreadable bodies are a 400 like any other bad input
fn read_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::invalid(rejection.body_text()))
}

#[cfg(test)]
mod tests;
