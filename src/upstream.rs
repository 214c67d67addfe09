use axum::http::StatusCode;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::error::ApiError;
use crate::metrics::{UPSTREAM_ERRORS, UPSTREAM_LATENCY};
use crate::prompts::Task;

// Responses API request format

#[derive(Serialize, Debug, Clone)]
pub struct InputMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl InputMessage {
    pub fn new(role: impl Into<String>, content: Vec<ContentPart>) -> Self {
        Self {
            role: role.into(),
            content,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    // data: url with the base64 image, sent as is
    InputImage { image_url: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::InputText { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::InputImage {
            image_url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a [InputMessage],
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

// Responses API response format, only the parts that can carry text.
// Anything shaped differently is skipped, so an odd body ends up as an
// empty result rather than a parse failure.

#[derive(Deserialize, Debug)]
struct ResponsesBody {
    #[serde(default, deserialize_with = "lenient")]
    output_text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    output: Option<Vec<Value>>,
}

#[derive(Deserialize, Debug)]
struct OutputItem {
    #[serde(default, deserialize_with = "lenient")]
    content: Option<Vec<Value>>,
}

#[derive(Deserialize, Debug)]
struct OutputPart {
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl ResponsesBody {
    // Aggregated `output_text` wins, otherwise the first part of any output
    // item that carries a non-empty `text`.
    fn into_text(self) -> Option<String> {
        if let Some(text) = self.output_text.filter(|t| !t.is_empty()) {
            return Some(text);
        }
        self.output
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| serde_json::from_value::<OutputItem>(item).ok())
            .flat_map(|item| item.content.unwrap_or_default())
            .filter_map(|part| serde_json::from_value::<OutputPart>(part).ok())
            .find_map(|part| part.text.filter(|t| !t.is_empty()))
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

// Client for the remote model. One request per call, never retries.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl UpstreamClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn ensure_configured(&self) -> Result<(), ApiError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ApiError::Unconfigured)
        }
    }

    // Single request, returns the extracted text
    pub async fn complete(&self, task: Task, input: &[InputMessage]) -> Result<String, ApiError> {
        let result = self.complete_inner(task, input).await;
        if let Err(e) = &result {
            record_failure(task, e);
        }
        result
    }

    async fn complete_inner(&self, task: Task, input: &[InputMessage]) -> Result<String, ApiError> {
        let response = self.send(task, input, false).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let parsed: ResponsesBody =
            serde_json::from_slice(&body).map_err(|e| ApiError::Internal(e.to_string()))?;

        parsed
            .into_text()
            .ok_or_else(|| ApiError::EmptyResult(task.empty_message().to_string()))
    }

    // Same request with `stream: true`; the caller decodes the event stream
    pub async fn stream(
        &self,
        task: Task,
        input: &[InputMessage],
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, ApiError> {
        match self.send(task, input, true).await {
            Ok(response) => Ok(response.bytes_stream().boxed()),
            Err(e) => {
                record_failure(task, &e);
                Err(e)
            }
        }
    }

    async fn send(
        &self,
        task: Task,
        input: &[InputMessage],
        stream: bool,
    ) -> Result<reqwest::Response, ApiError> {
        let api_key = self.api_key.as_deref().ok_or(ApiError::Unconfigured)?;
        let request = ResponsesRequest {
            model: &self.model,
            input,
            max_output_tokens: task.max_output_tokens(),
            stream,
        };

        let start = Instant::now();
        let response = self
            .http
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        UPSTREAM_LATENCY
            .with_label_values(&[task.as_str()])
            .observe(start.elapsed().as_secs_f64());

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            // the body may be anything, only use it when it has the usual shape
            let body = response.bytes().await.unwrap_or_default();
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|envelope| envelope.error)
                .and_then(|detail| detail.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| task.failure_message().to_string());
            return Err(ApiError::Upstream { status, message });
        }

        tracing::debug!(task = task.as_str(), status = status.as_u16(), "upstream responded");
        Ok(response)
    }
}

fn record_failure(task: Task, error: &ApiError) {
    let kind = match error {
        ApiError::RateLimited => "rate_limited",
        ApiError::Upstream { .. } => "upstream",
        ApiError::EmptyResult(_) => "empty",
        ApiError::Unconfigured => "unconfigured",
        ApiError::InvalidRequest(_) | ApiError::Internal(_) => "internal",
    };
    UPSTREAM_ERRORS.with_label_values(&[task.as_str(), kind]).inc();
    tracing::warn!(task = task.as_str(), kind, error = %error, "upstream call failed");
}
