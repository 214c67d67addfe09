use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub const RATE_LIMITED_MESSAGE: &str = "時間を置いて再試行してください。";
pub const UNCONFIGURED_MESSAGE: &str = "OpenAI API key is not configured.";

// Every failure a route can produce. The message is sent back as a plain
// text body, the variant decides the status code.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{}", UNCONFIGURED_MESSAGE)]
    Unconfigured,

    #[error("{}", RATE_LIMITED_MESSAGE)]
    RateLimited,

    #[error("{message}")]
    Upstream { status: StatusCode, message: String },

    #[error("{0}")]
    EmptyResult(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream { status, .. } => *status,
            ApiError::EmptyResult(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "request rejected");
        }

        (status, self.to_string()).into_response()
    }
}
