//! Bearer API-key check for write endpoints.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Middleware: `Authorization: Bearer <API_KEY_SECRET>`.
///
/// A missing key answers 401, a wrong one 403. With no key configured every
/// request is refused with 403.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> AppResult<Response> {
    // ---
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    let Some(provided) = provided else {
        return Err(AppError::unauthorized("MISSING_API_KEY", "Missing API key"));
    };

    match state.config.api_key.as_deref() {
        Some(expected) if keys_match(expected, &provided) => Ok(next.run(req).await),
        _ => {
            tracing::warn!(path = %req.uri().path(), "rejected request with invalid API key");
            Err(AppError::forbidden("INVALID_API_KEY", "Invalid API key"))
        }
    }
}

/// Constant-time comparison of the configured and presented keys.
fn keys_match(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
