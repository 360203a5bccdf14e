//! Black-box checks against a running service.
//!
//! Skipped unless `INGEST_INTEGRATION_TEST=1`. Point `BASE_URL` at the
//! server (default `http://localhost:8080`) and set `API_KEY_SECRET` to the
//! key it was started with.

use anyhow::Result;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct Accepted {
    ok: bool,
    received_at: String,
    reading_id: String,
}

struct Target {
    base: String,
    key: String,
    client: Client,
}

fn target() -> Option<Target> {
    // ---
    if std::env::var("INGEST_INTEGRATION_TEST").as_deref() != Ok("1") {
        eprintln!("skipping: INGEST_INTEGRATION_TEST not set");
        return None;
    }
    Some(Target {
        base: std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into()),
        key: std::env::var("API_KEY_SECRET").unwrap_or_else(|_| "test-key".into()),
        client: Client::new(),
    })
}

fn reading(sensor_id: &str) -> Value {
    json!({
        "sensor_id": sensor_id,
        "gateway_id": "GW_IT",
        "timestamp": Utc::now().timestamp_millis(),
        "water_level_cm": 120.5,
        "rain_accumulated_mm": 2.0,
        "flow_rate_lmin": 40.0,
        "temperature_c": 18.0,
        "humidity_percent": 70.0,
        "battery_percent": 88.0,
    })
}

#[tokio::test]
async fn liveness_and_readiness_respond() -> Result<()> {
    // ---
    let Some(t) = target() else { return Ok(()) };

    let live: Value = t.client.get(format!("{}/health", t.base)).send().await?.json().await?;
    assert_eq!(live["status"], "ok");

    let ready = t.client.get(format!("{}/api/v1/health", t.base)).send().await?;
    assert_eq!(ready.status(), StatusCode::OK, "database should be reachable");
    let body: Value = ready.json().await?;
    assert_eq!(body["database"], "connected");

    Ok(())
}

#[tokio::test]
async fn resubmitted_reading_is_stored_once() -> Result<()> {
    // ---
    let Some(t) = target() else { return Ok(()) };
    let sensor_id = format!("IT_{}", uuid::Uuid::new_v4().simple());
    let payload = reading(&sensor_id);
    let url = format!("{}/api/v1/data/sensor", t.base);

    let first = t.client.post(&url).bearer_auth(&t.key).json(&payload).send().await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let accepted: Accepted = first.json().await?;
    assert!(accepted.ok);
    assert!(!accepted.reading_id.is_empty());
    assert!(!accepted.received_at.is_empty());

    let second = t.client.post(&url).bearer_auth(&t.key).json(&payload).send().await?;
    assert_eq!(second.status(), StatusCode::OK);
    let body: Value = second.json().await?;
    assert_eq!(body["deduplicated"], true);

    let history: Value = t
        .client
        .get(format!("{}/api/v1/data/history/{}", t.base, sensor_id))
        .send()
        .await?
        .json()
        .await?;
    let stored = history["data"].as_array().map(Vec::len).unwrap_or_default();
    assert_eq!(stored, 1, "history for {sensor_id}: {history}");

    Ok(())
}

#[tokio::test]
async fn ingest_requires_api_key() -> Result<()> {
    // ---
    let Some(t) = target() else { return Ok(()) };
    let url = format!("{}/api/v1/data/sensor", t.base);

    let missing = t.client.post(&url).json(&reading("IT_NOKEY")).send().await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = t
        .client
        .post(&url)
        .bearer_auth("not-the-key")
        .json(&reading("IT_NOKEY"))
        .send()
        .await?;
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    Ok(())
}
