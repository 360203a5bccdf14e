//! Alert listing and operator transitions.
//!
//! ACTIVE -> ACKNOWLEDGED, and ACTIVE | ACKNOWLEDGED -> RESOLVED. Any other
//! transition answers 409 with the alert's current status.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::auth::require_api_key;
use crate::error::{AppError, AppResult};
use crate::events::EventKind;
use crate::models::AlertFilter;
use crate::state::AppState;
use crate::store::Transition;

const MAX_LIST_LIMIT: u32 = 500;

// ---

pub fn router(state: AppState) -> Router<AppState> {
    // ---
    let writes = Router::new()
        .route("/api/v1/alerts/{alert_id}/acknowledge", post(acknowledge))
        .route("/api/v1/alerts/{alert_id}/resolve", post(resolve))
        .route_layer(middleware::from_fn_with_state(state, require_api_key));

    Router::new()
        .route("/api/v1/alerts", get(list))
        .merge(writes)
}

#[derive(Debug, Deserialize)]
struct AcknowledgeBody {
    user: String,
}

async fn list(
    State(state): State<AppState>,
    Query(mut filter): Query<AlertFilter>,
) -> AppResult<Json<Value>> {
    // ---
    filter.limit = Some(filter.limit.unwrap_or(100).min(MAX_LIST_LIMIT));
    let alerts = state
        .store
        .list_alerts(&filter)
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?;

    Ok(Json(json!({
        "ok": true,
        "count": alerts.len(),
        "data": alerts,
    })))
}

async fn acknowledge(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    // ---
    let id = parse_id(&alert_id)?;
    let body: AcknowledgeBody = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request("VALIDATION_ERROR", format!("user: {e}")))?;
    let user = body.user.trim();
    if user.is_empty() {
        return Err(AppError::bad_request("VALIDATION_ERROR", "user: must not be empty"));
    }

    let outcome = state
        .store
        .acknowledge_alert(id, user, Utc::now())
        .await
        .map_err(|e| AppError::internal("UPDATE_ERROR", format!("{e:#}")))?;
    applied(&state, EventKind::AlertAcknowledged, outcome)
}

async fn resolve(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> AppResult<Json<Value>> {
    // ---
    let id = parse_id(&alert_id)?;
    let outcome = state
        .store
        .resolve_alert(id, Utc::now())
        .await
        .map_err(|e| AppError::internal("UPDATE_ERROR", format!("{e:#}")))?;
    applied(&state, EventKind::AlertResolved, outcome)
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| AppError::bad_request("VALIDATION_ERROR", "alert_id: not a UUID"))
}

fn applied(state: &AppState, kind: EventKind, outcome: Transition) -> AppResult<Json<Value>> {
    // ---
    match outcome {
        Transition::Applied(alert) => {
            tracing::info!(
                alert_id = %alert.id,
                sensor_id = %alert.sensor_id,
                status = alert.status.as_str(),
                "alert updated"
            );
            state.hub.publish_alert_change(kind, &alert);
            Ok(Json(json!({ "ok": true, "data": alert })))
        }
        Transition::Rejected(alert) => Err(AppError::conflict(format!(
            "Alert is {}",
            alert.status.as_str()
        ))),
        Transition::NotFound => Err(AppError::not_found("Alert not found")),
    }
}
