//! Read-only reading queries for dashboards.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::store;

const GATEWAY_READINGS_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 1000;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/v1/data/status/{sensor_id}", get(status))
        .route("/api/v1/data/history/{sensor_id}", get(history))
        .route("/api/v1/data/stats/{sensor_id}", get(stats))
        .route("/api/v1/data/gateway/{gateway_id}", get(by_gateway))
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    #[serde(default = "default_hours")]
    hours: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_hours() -> u32 {
    24
}

fn default_limit() -> u32 {
    100
}

impl WindowQuery {
    /// Start of the lookback, never before the epoch.
    fn since(&self) -> chrono::DateTime<Utc> {
        let span = std::time::Duration::from_secs(u64::from(self.hours) * 3600);
        store::before(Utc::now(), span)
            .unwrap_or(chrono::DateTime::<Utc>::UNIX_EPOCH)
            .max(chrono::DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// `GET /api/v1/data/status/{sensor_id}`: the latest reading.
async fn status(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> AppResult<Json<Value>> {
    // ---
    let latest = state
        .store
        .latest_reading(&sensor_id)
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?
        .ok_or_else(|| AppError::not_found("No data found for sensor"))?;

    Ok(Json(json!({ "ok": true, "data": latest })))
}

/// `GET /api/v1/data/history/{sensor_id}?hours=24&limit=100`, newest first.
async fn history(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> AppResult<Json<Value>> {
    // ---
    let limit = window.limit.min(MAX_HISTORY_LIMIT);
    let readings = state
        .store
        .recent_readings(&sensor_id, window.since(), limit)
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?;

    Ok(Json(json!({
        "ok": true,
        "sensor_id": sensor_id,
        "hours": window.hours,
        "count": readings.len(),
        "data": readings,
    })))
}

/// `GET /api/v1/data/stats/{sensor_id}?hours=24`
async fn stats(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    Query(window): Query<WindowQuery>,
) -> AppResult<Json<Value>> {
    // ---
    let stats = state
        .store
        .sensor_stats(&sensor_id, window.since())
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?
        .ok_or_else(|| AppError::not_found("No statistics available"))?;

    Ok(Json(json!({
        "ok": true,
        "sensor_id": sensor_id,
        "hours": window.hours,
        "stats": stats,
    })))
}

/// `GET /api/v1/data/gateway/{gateway_id}`: latest readings relayed by one gateway.
async fn by_gateway(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> AppResult<Json<Value>> {
    // ---
    let readings = state
        .store
        .readings_by_gateway(&gateway_id, GATEWAY_READINGS_LIMIT)
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?;

    Ok(Json(json!({
        "ok": true,
        "gateway_id": gateway_id,
        "readings_count": readings.len(),
        "data": readings,
    })))
}
