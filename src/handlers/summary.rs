use axum::{Json, extract::State, extract::rejection::JsonRejection};
use std::sync::Arc;

use super::read_body;
use crate::error::ApiError;
use crate::metrics::REQUEST_TOTAL;
use crate::models::{SummaryResponse, TranscriptRequest, required};
use crate::prompts::{self, Task};
use crate::state::AppState;

pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TranscriptRequest>, JsonRejection>,
) -> Result<Json<SummaryResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["summary"]).inc();

    let transcript = required(read_body(payload)?.transcript, "transcript")?;
    state.upstream.ensure_configured()?;

    let summary = state
        .upstream
        .complete(Task::Summarize, &prompts::summarize(&transcript))
        .await?;

    Ok(Json(SummaryResponse { summary }))
}
