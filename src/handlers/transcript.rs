use axum::{Json, extract::State, extract::rejection::JsonRejection};
use std::sync::Arc;

use super::read_body;
use crate::error::ApiError;
use crate::metrics::REQUEST_TOTAL;
use crate::models::{ImageRequest, TranscriptResponse, required};
use crate::prompts::{self, Task};
use crate::state::AppState;

pub async fn transcript_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<TranscriptResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["transcript"]).inc();

    let image = required(read_body(payload)?.image_base64, "imageBase64")?;
    state.upstream.ensure_configured()?;

    let transcript = state
        .upstream
        .complete(Task::Transcribe, &prompts::transcribe(&image))
        .await?;

    Ok(Json(TranscriptResponse { transcript }))
}
