//! Server-Sent Events views of the event hub.
//!
//! - `GET /api/v1/stream/alerts`: global alerts channel
//! - `GET /api/v1/stream/sensors/{sensor_id}`: one sensor's room
//!
//! A slow client that falls behind the channel loses the oldest events and
//! stays connected. Every stream ends when the hub closes at shutdown.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::{Stream, StreamExt};

use crate::events::{Event, EventHub};
use crate::state::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/v1/stream/alerts", get(alerts))
        .route("/api/v1/stream/sensors/{sensor_id}", get(sensor))
}

async fn alerts(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    sse(&state.hub, state.hub.subscribe_alerts())
}

async fn sensor(
    State(state): State<AppState>,
    Path(sensor_id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    tracing::debug!(sensor_id, "sensor stream subscribed");
    sse(&state.hub, state.hub.subscribe_sensor(&sensor_id))
}

fn sse(
    hub: &EventHub,
    rx: broadcast::Receiver<Event>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    // ---
    let events = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(Some(event)),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "stream subscriber lagged");
            None
        }
    });
    // `None` marks the end of the stream
    let closing = WatchStream::new(hub.closing())
        .filter(|closed| *closed)
        .map(|_| None);

    let stream = events
        .merge(closing)
        .take_while(Option::is_some)
        .filter_map(|event| event.map(|e| Ok(to_sse(&e))));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.kind.as_str())
        .data(event.data.to_string())
}
