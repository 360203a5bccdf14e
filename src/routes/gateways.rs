//! Gateway listing, detail and registration.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};

use super::auth::require_api_key;
use crate::error::{AppError, AppResult};
use crate::models::GatewayRegistration;
use crate::state::AppState;

// ---

pub fn router(state: AppState) -> Router<AppState> {
    // ---
    let writes = Router::new()
        .route("/api/v1/data/gateway/register", post(register))
        .route_layer(middleware::from_fn_with_state(state, require_api_key));

    Router::new()
        .route("/api/v1/data/gateways", get(list))
        .route("/api/v1/data/gateway/{gateway_id}/info", get(info))
        .merge(writes)
}

async fn list(State(state): State<AppState>) -> AppResult<Json<Value>> {
    // ---
    let gateways = state
        .store
        .list_gateways()
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?;

    Ok(Json(json!({
        "ok": true,
        "count": gateways.len(),
        "gateways": gateways,
    })))
}

async fn info(
    State(state): State<AppState>,
    Path(gateway_id): Path<String>,
) -> AppResult<Json<Value>> {
    // ---
    let gateway = state
        .store
        .gateway(&gateway_id)
        .await
        .map_err(|e| AppError::internal("QUERY_ERROR", format!("{e:#}")))?
        .ok_or_else(|| AppError::not_found("Gateway not found"))?;

    Ok(Json(json!({ "ok": true, "data": gateway })))
}

/// `POST /api/v1/data/gateway/register` with `{ gateway_id, name?, location? }`.
async fn register(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Value>)> {
    // ---
    let registration: GatewayRegistration = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request("VALIDATION_ERROR", format!("gateway: {e}")))?;
    if registration.gateway_id.trim().is_empty() {
        return Err(AppError::bad_request(
            "VALIDATION_ERROR",
            "gateway_id is required",
        ));
    }

    let gateway = state
        .store
        .register_gateway(&registration)
        .await
        .map_err(|e| AppError::internal("REGISTER_ERROR", format!("{e:#}")))?;
    tracing::info!(gateway_id = %gateway.gateway_id, "gateway registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "message": "Gateway registered successfully",
            "gateway_id": gateway.gateway_id,
            "data": gateway,
        })),
    ))
}
