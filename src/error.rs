//! Error taxonomy for the ingestion pipeline and its HTTP mapping.
//!
//! Validation failures and storage failures are the only errors that ever
//! reach an ingestion caller. Duplicates are an outcome, not an error, and
//! best-effort side channels (cache, alerting, gateway bookkeeping) never
//! surface here at all.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

// ---

/// A payload field that is missing, malformed, or outside its valid range.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the synchronous ingestion path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rate limit exceeded for {sensor_id}")]
    RateLimited { sensor_id: String, retry_after: u64 },

    /// The reading could not be made durable. Never swallowed.
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

/// HTTP-facing error: a status plus a JSON body with `error` and `code`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
    pub retry_after: Option<u64>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            retry_after: None,
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "INVALID_TRANSITION", message)
    }

    /// Log the cause and answer with a generic 500.
    pub fn internal(code: &'static str, err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, code, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "Internal server error",
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // ---
        let mut body = json!({
            "ok": false,
            "error": self.message,
            "code": self.code,
        });
        if let Some(retry_after) = self.retry_after {
            body["retryAfter"] = json!(retry_after);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        // ---
        match err {
            IngestError::Validation(v) => AppError::bad_request("VALIDATION_ERROR", v.to_string()),
            IngestError::RateLimited { retry_after, .. } => AppError {
                retry_after: Some(retry_after),
                ..AppError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMIT_EXCEEDED",
                    "Rate limit exceeded",
                )
            },
            IngestError::Storage(e) => AppError::internal("INGEST_ERROR", format!("{e:#}")),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
