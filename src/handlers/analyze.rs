use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::read_body;
use crate::cache::{Flight, make_cache_key};
use crate::error::ApiError;
use crate::metrics::{CACHE_HITS, CACHE_MISSES, CACHE_SIZE, REQUEST_TOTAL};
use crate::models::{AnalyzeResult, ImageRequest, required};
use crate::prompts::{self, Task};
use crate::questions::parse_analysis;
use crate::state::AppState;
use crate::upstream::UpstreamClient;

const X_CACHE: &str = "x-cache";

// Transcribe, then summarize with questions. Results are cached per image
// fingerprint and concurrent requests for the same image share one run.
pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    REQUEST_TOTAL.with_label_values(&["analyze"]).inc();

    let image = required(read_body(payload)?.image_base64, "imageBase64")?;
    state.upstream.ensure_configured()?;

    let key = make_cache_key(state.cache_key_mode, &image);
    if let Some(hit) = state.cache.get(&key) {
        return Ok(cache_hit(&key, hit));
    }

    match state.in_flight.join(&key) {
        Flight::Follower(rx) => {
            tracing::debug!(key = %key, "joining in-flight analysis");
            // a closed channel means the leading request was dropped midway
            let result = rx.await.map_err(|_| {
                ApiError::Internal(Task::AnalyzeSummary.failure_message().to_string())
            })??;
            Ok(Json(result).into_response())
        }
        Flight::Leader(flight) => {
            // another leader may have finished between the lookup and the join
            if let Some(hit) = state.cache.get(&key) {
                flight.complete(&Ok(hit.clone()));
                return Ok(cache_hit(&key, hit));
            }

            CACHE_MISSES.inc();
            tracing::info!(
                key = %key,
                in_flight = state.in_flight.len(),
                "cache miss, analyzing image"
            );

            let result = analyze(&state.upstream, &image).await;
            if let Ok(analysis) = &result {
                state.cache.set(key.clone(), analysis.clone());
                CACHE_SIZE.set(state.cache.len() as f64);
            }
            flight.complete(&result);

            Ok(Json(result?).into_response())
        }
    }
}

fn cache_hit(key: &str, hit: AnalyzeResult) -> Response {
    CACHE_HITS.inc();
    tracing::info!(key = %key, "cache hit");
    ([(X_CACHE, "HIT")], Json(hit)).into_response()
}

// Both calls must succeed, nothing partial is returned
async fn analyze(upstream: &UpstreamClient, image: &str) -> Result<AnalyzeResult, ApiError> {
    let transcript = upstream
        .complete(Task::AnalyzeTranscript, &prompts::transcribe(image))
        .await?;

    let content = upstream
        .complete(Task::AnalyzeSummary, &prompts::analyze_summary(&transcript))
        .await?;

    let (summary, questions) = parse_analysis(&content)
        .ok_or_else(|| ApiError::EmptyResult(Task::AnalyzeSummary.empty_message().to_string()))?;

    Ok(AnalyzeResult {
        summary,
        transcript: Some(transcript),
        questions: Some(questions),
    })
}
