//! Sensor configuration admin.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::require_api_key;
use crate::error::{AppError, AppResult};
use crate::models::{GeoPoint, SensorConfig, Thresholds};
use crate::state::AppState;

// ---

pub fn router(state: AppState) -> Router<AppState> {
    // ---
    let writes = Router::new()
        .route(
            "/api/v1/config/sensors/{sensor_id}",
            axum::routing::put(upsert),
        )
        .route_layer(middleware::from_fn_with_state(state, require_api_key));

    Router::new()
        .route("/api/v1/config/sensors", get(list_enabled))
        .route("/api/v1/config/sensors/{sensor_id}", get(one))
        .route("/api/v1/config/thresholds/{sensor_id}", get(thresholds))
        .merge(writes)
}

/// Body of `PUT /api/v1/config/sensors/{sensor_id}`. The id comes from the path.
#[derive(Debug, Deserialize)]
struct SensorConfigBody {
    name: Option<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    thresholds: Thresholds,
    location: Option<GeoPoint>,
}

fn enabled_by_default() -> bool {
    true
}

async fn list_enabled(State(state): State<AppState>) -> AppResult<Json<Value>> {
    // ---
    let sensors = state
        .store
        .enabled_sensor_configs()
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?;

    Ok(Json(json!({
        "ok": true,
        "count": sensors.len(),
        "data": sensors,
    })))
}

async fn load(state: &AppState, sensor_id: &str) -> AppResult<SensorConfig> {
    state
        .store
        .sensor_config(sensor_id)
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?
        .ok_or_else(|| AppError::not_found("Sensor not found"))
}

async fn one(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> AppResult<Json<Value>> {
    let sensor = load(&state, &sensor_id).await?;
    Ok(Json(json!({ "ok": true, "data": sensor })))
}

async fn thresholds(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> AppResult<Json<Value>> {
    // ---
    let sensor = load(&state, &sensor_id).await?;
    Ok(Json(json!({
        "ok": true,
        "sensor_id": sensor_id,
        "thresholds": sensor.thresholds,
    })))
}

async fn upsert(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    // ---
    let body: SensorConfigBody = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request("VALIDATION_ERROR", format!("sensor: {e}")))?;
    check_thresholds(&body.thresholds)?;

    let config = SensorConfig {
        sensor_id,
        name: body.name,
        enabled: body.enabled,
        thresholds: body.thresholds,
        location: body.location,
    };
    let saved = state
        .store
        .upsert_sensor_config(&config)
        .await
        .map_err(|e| AppError::internal("UPDATE_ERROR", format!("{e:#}")))?;
    tracing::info!(
        sensor_id = %saved.sensor_id,
        enabled = saved.enabled,
        "sensor configuration updated"
    );

    Ok(Json(json!({
        "ok": true,
        "message": "Sensor configuration updated",
        "data": saved,
    })))
}

fn check_thresholds(t: &Thresholds) -> AppResult<()> {
    // ---
    let fields = [
        ("water_level_critical_cm", t.water_level_critical_cm),
        ("water_level_warning_cm", t.water_level_warning_cm),
        ("rainfall_heavy_mm", t.rainfall_heavy_mm),
        ("flow_excessive_lmin", t.flow_excessive_lmin),
    ];
    for (field, value) in fields {
        if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(AppError::bad_request(
                "VALIDATION_ERROR",
                format!("thresholds.{field}: must be a non-negative number"),
            ));
        }
    }
    if let (Some(warning), Some(critical)) = (t.water_level_warning_cm, t.water_level_critical_cm) {
        if warning > critical {
            return Err(AppError::bad_request(
                "VALIDATION_ERROR",
                "thresholds.water_level_warning_cm: must not exceed water_level_critical_cm",
            ));
        }
    }
    Ok(())
}
