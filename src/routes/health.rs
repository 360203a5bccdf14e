// src/routes/health.rs
//! Health check endpoints for the floodwatch ingest service.
//!
//! - `GET /health`: static liveness, used by container orchestrators and CI.
//!   Touches nothing.
//! - `GET /api/v1/health`: readiness. Pings the durable store and reports
//!   `{ status, database }`, answering 503 when the store is unreachable.
//!
//! The gateway (`mod.rs`) merges this subrouter into the top-level router so
//! that `main.rs` does not need to know about individual endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::store;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    database: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Handle `GET /api/v1/health`.
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    // ---
    match store::bounded(state.config.dependency_timeout(), state.store.ping()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ok",
                database: "connected",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "degraded",
                    database: "unreachable",
                }),
            )
        }
    }
}

/// Create a subrouter containing the health routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/health", get(readiness))
}
