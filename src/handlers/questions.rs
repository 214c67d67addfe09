use axum::{Json, extract::State, extract::rejection::JsonRejection};
use std::sync::Arc;

use super::read_body;
use crate::error::ApiError;
use crate::metrics::REQUEST_TOTAL;
use crate::models::{QuestionsResponse, TranscriptRequest, required};
use crate::prompts::{self, Task};
use crate::questions::{parse_questions, select_questions};
use crate::state::AppState;

pub async fn questions_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TranscriptRequest>, JsonRejection>,
) -> Result<Json<QuestionsResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["questions"]).inc();

    let transcript = required(read_body(payload)?.transcript, "transcript")?;
    state.upstream.ensure_configured()?;

    let text = state
        .upstream
        .complete(Task::Questions, &prompts::questions(&transcript))
        .await?;

    let questions = select_questions(parse_questions(&text));
    if questions.is_empty() {
        return Err(ApiError::EmptyResult(Task::Questions.empty_message().to_string()));
    }

    Ok(Json(QuestionsResponse { questions }))
}
