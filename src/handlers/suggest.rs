use axum::{Json, extract::State, extract::rejection::JsonRejection};
use std::sync::Arc;

use super::read_body;
use crate::error::ApiError;
use crate::metrics::REQUEST_TOTAL;
use crate::models::{QuestionsResponse, SuggestRequest, required, valid_messages};
use crate::prompts::{self, Task};
use crate::questions::{parse_questions, select_questions};
use crate::state::AppState;

// Follow-up questions for an ongoing conversation
pub async fn suggest_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SuggestRequest>, JsonRejection>,
) -> Result<Json<QuestionsResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["suggest"]).inc();

    let request = read_body(payload)?;
    let summary = required(request.summary, "summary")?;
    let messages = valid_messages(request.messages);
    state.upstream.ensure_configured()?;

    let text = state
        .upstream
        .complete(Task::Suggest, &prompts::suggest(&summary, &messages))
        .await?;

    let questions = select_questions(parse_questions(&text));
    if questions.is_empty() {
        return Err(ApiError::EmptyResult(Task::Suggest.empty_message().to_string()));
    }

    Ok(Json(QuestionsResponse { questions }))
}
