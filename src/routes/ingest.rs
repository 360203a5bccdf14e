// src/routes/ingest.rs
//! Gateway-facing ingestion endpoints.
//!
//! - `POST /api/v1/data/sensor` (gateway firmware, either wire shape)
//! - `POST /api/v1/data/ingest` (older firmware, same pipeline)
//!
//! Both sit behind the API-key middleware. An optional `X-Idempotency-Key`
//! header replays the first successful response for that key with 200.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{middleware, Json, Router};
use serde_json::{json, Value};

use super::auth::require_api_key;
use crate::error::{AppError, AppResult};
use crate::ingest::IngestOutcome;
use crate::state::AppState;

const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

// ---

pub fn router(state: AppState) -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/v1/data/sensor", post(handler))
        .route("/api/v1/data/ingest", post(handler))
        .route_layer(middleware::from_fn_with_state(state, require_api_key))
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    // ---
    let replay_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(|k| format!("idempotency:{k}"));

    if let Some(key) = &replay_key {
        if let Some(cached) = state.cache.lookup(key).await {
            if let Ok(previous) = serde_json::from_str::<Value>(&cached) {
                tracing::debug!(key, "replaying idempotent response");
                return Ok((StatusCode::OK, Json(previous)).into_response());
            }
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request("VALIDATION_ERROR", format!("payload: {e}")))?;

    match state.ingest.ingest(&payload).await? {
        IngestOutcome::Accepted(stored) => {
            let body = json!({
                "ok": true,
                "received_at": stored.received_at.to_rfc3339(),
                "reading_id": stored.id.to_string(),
            });
            if let Some(key) = &replay_key {
                let ttl = Duration::from_secs(state.config.duplicate_window_secs);
                state.cache.remember(key, &body.to_string(), ttl).await;
            }
            Ok((StatusCode::CREATED, Json(body)).into_response())
        }
        IngestOutcome::Duplicate => Ok((
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "message": "Duplicate reading, skipped",
                "deduplicated": true,
            })),
        )
            .into_response()),
    }
}
