//! Durable store for readings, gateways, sensor configuration and alerts.
//!
//! The pipeline only sees the [`Store`] trait. Production uses
//! [`PgStore`]; tests use the in-memory store in `memory`.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Alert, AlertFilter, AlertKind, Gateway, GatewayRegistration, Reading, SensorConfig,
    SensorStats, StoredReading,
};

mod postgres;

#[cfg(test)]
pub(crate) mod memory;

pub use postgres::PgStore;

// ---

/// Identity of a newly persisted reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistedReading {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
}

/// Outcome of an alert state change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Alert),
    /// The alert exists but is not in a state that allows the change.
    Rejected(Alert),
    NotFound,
}

/// Run a store call with an upper bound; an elapsed timer becomes an error.
pub async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    // ---
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| anyhow!("store call timed out after {limit:?}"))?
}

/// `at - span`, or `None` outside the representable calendar.
pub fn before(at: DateTime<Utc>, span: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| at.checked_sub_signed(span))
}

/// `at + span`, or `None` outside the representable calendar.
pub fn after(at: DateTime<Utc>, span: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| at.checked_add_signed(span))
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trip to the backend.
    async fn ping(&self) -> Result<()>;

    // readings

    /// Append a reading. A single atomic insert; the server assigns
    /// `received_at` and the identifier.
    async fn insert_reading(&self, reading: &Reading) -> Result<PersistedReading>;

    /// Is there a reading of `sensor_id` whose sensor timestamp lies within
    /// `radius` of `timestamp` and that was received at or after `received_since`?
    async fn reading_exists_near(
        &self,
        sensor_id: &str,
        timestamp: DateTime<Utc>,
        radius: Duration,
        received_since: DateTime<Utc>,
    ) -> Result<bool>;

    /// Readings of one sensor with timestamp >= `since`, newest first.
    async fn recent_readings(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredReading>>;

    async fn latest_reading(&self, sensor_id: &str) -> Result<Option<StoredReading>>;

    /// Newest readings relayed through one gateway.
    async fn readings_by_gateway(&self, gateway_id: &str, limit: u32)
        -> Result<Vec<StoredReading>>;

    /// Aggregates over readings with timestamp >= `since`; `None` when there are none.
    async fn sensor_stats(&self, sensor_id: &str, since: DateTime<Utc>)
        -> Result<Option<SensorStats>>;

    // gateways

    /// Upsert liveness: status online, `last_seen` = max(stored, `seen_at`),
    /// reading count + 1.
    async fn touch_gateway(&self, gateway_id: &str, seen_at: DateTime<Utc>) -> Result<()>;

    async fn register_gateway(&self, registration: &GatewayRegistration) -> Result<Gateway>;

    async fn gateway(&self, gateway_id: &str) -> Result<Option<Gateway>>;

    /// All gateways, most recently seen first.
    async fn list_gateways(&self) -> Result<Vec<Gateway>>;

    /// Mark online gateways silent since before `cutoff` as offline.
    async fn mark_gateways_offline(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // sensor configuration

    async fn sensor_config(&self, sensor_id: &str) -> Result<Option<SensorConfig>>;

    async fn enabled_sensor_configs(&self) -> Result<Vec<SensorConfig>>;

    async fn upsert_sensor_config(&self, config: &SensorConfig) -> Result<SensorConfig>;

    // alerts

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;

    async fn count_active_alerts(&self, sensor_id: &str, kind: AlertKind) -> Result<i64>;

    /// Alerts matching `filter`, newest first.
    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    /// ACTIVE -> ACKNOWLEDGED.
    async fn acknowledge_alert(&self, id: Uuid, by: &str, at: DateTime<Utc>)
        -> Result<Transition>;

    /// ACTIVE | ACKNOWLEDGED -> RESOLVED.
    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Transition>;

    /// Delete alerts detected before `cutoff`.
    async fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
