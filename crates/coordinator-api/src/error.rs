//! Maps [`CoreError`] onto the `{code, message}` error body (spec §7),
//! grounded in the teacher's `ErrorResponse`/`bad_request` pair but carrying
//! the core's richer, stable error codes instead of a single bare message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coordinator_core::CoreError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "unmapped core error");
        }
        let body = ErrorBody { code: self.0.code(), message: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
