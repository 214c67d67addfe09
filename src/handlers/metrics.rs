use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::error::ApiError;
use crate::metrics::render;

pub async fn metrics_handler() -> Result<impl IntoResponse, ApiError> {
    let body = render().map_err(ApiError::Internal)?;
    Ok(([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}
