use axum::Router;

use crate::state::AppState;

mod alerts;
mod auth;
mod gateways;
mod health;
mod ingest;
mod readings;
mod sensors;
mod stream;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(ingest::router(state.clone()))
        .merge(readings::router())
        .merge(gateways::router(state.clone()))
        .merge(sensors::router(state.clone()))
        .merge(alerts::router(state.clone()))
        .merge(stream::router())
        .merge(health::router())
        .with_state(state)
}
