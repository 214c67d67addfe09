use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::header::{CACHE_CONTROL, CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;

use super::read_body;
use crate::error::ApiError;
use crate::metrics::REQUEST_TOTAL;
use crate::models::{ChatReply, ChatRequest, required, valid_messages};
use crate::prompts::{self, Task};
use crate::sse;
use crate::state::AppState;

// Answers about the summarized page. Streams plain text by default,
// `"stream": false` gets a single {reply} instead.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    REQUEST_TOTAL.with_label_values(&["chat"]).inc();

    let request = read_body(payload)?;
    let summary = required(request.summary, "summary")?;
    let messages = valid_messages(request.messages);
    if messages.is_empty() {
        return Err(ApiError::invalid("messages is required"));
    }
    state.upstream.ensure_configured()?;

    let image = request.image_base64.filter(|image| !image.is_empty());
    let input = prompts::chat(&summary, image.as_deref(), &messages);

    if request.stream == Some(false) {
        let reply = state.upstream.complete(Task::Chat, &input).await?;
        return Ok(Json(ChatReply { reply }).into_response());
    }

    let upstream = state.upstream.stream(Task::Chat, &input).await?;

    // Headers are already out once the first piece is written, so a broken
    // upstream can only end the body early.
    let body = sse::deltas(upstream).filter_map(|piece| async move {
        match piece {
            Ok(text) => Some(Ok::<_, Infallible>(Bytes::from(text))),
            Err(e) => {
                tracing::warn!(error = %e, "chat stream ended by upstream error");
                None
            }
        }
    });

    Ok((
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CACHE_CONTROL, "no-cache, no-transform"),
        ],
        [("x-accel-buffering", "no")],
        Body::from_stream(body),
    )
        .into_response())
}
