//! Suppression, persistence and broadcast of alert candidates.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::rules::AlertCandidate;
use crate::cache::CacheGuard;
use crate::events::EventHub;
use crate::models::{Alert, AlertKind, AlertStatus, Reading};
use crate::store::{self, Store};

/// Cache key of the cool-down marker for one (type, sensor) pair.
pub fn suppression_key(kind: AlertKind, sensor_id: &str) -> String {
    format!("alert:{kind}:{sensor_id}")
}

pub struct AlertDispatcher {
    store: Arc<dyn Store>,
    cache: CacheGuard,
    hub: Arc<EventHub>,
    cooldown: Duration,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        cache: CacheGuard,
        hub: Arc<EventHub>,
        cooldown: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            hub,
            cooldown,
            timeout,
        }
    }

    /// Raise `candidate` unless its key is cooling down. Returns the stored alert.
    ///
    /// The cool-down marker is claimed atomically; an unreachable cache lets
    /// the alert through. A failed insert is logged and nothing is broadcast.
    pub async fn dispatch(&self, reading: &Reading, candidate: AlertCandidate) -> Option<Alert> {
        // ---
        let key = suppression_key(candidate.kind, &reading.sensor_id);
        if !self.cache.claim(&key, self.cooldown).await {
            tracing::debug!(
                sensor_id = %reading.sensor_id,
                alert_type = %candidate.kind,
                "alert suppressed during cool-down"
            );
            return None;
        }

        let escalation_level = match store::bounded(
            self.timeout,
            self.store
                .count_active_alerts(&reading.sensor_id, candidate.kind),
        )
        .await
        {
            Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Err(e) => {
                tracing::warn!(error = %e, "active alert count unavailable; escalation 0");
                0
            }
        };

        let alert = Alert {
            id: Uuid::new_v4(),
            sensor_id: reading.sensor_id.clone(),
            gateway_id: reading.gateway_id.clone(),
            kind: candidate.kind,
            severity: candidate.severity,
            value: candidate.value,
            threshold: candidate.threshold,
            message: candidate.message,
            detected_at: Utc::now(),
            status: AlertStatus::Active,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            escalation_level,
        };

        if let Err(e) = store::bounded(self.timeout, self.store.insert_alert(&alert)).await {
            tracing::error!(
                error = %format!("{e:#}"),
                sensor_id = %alert.sensor_id,
                alert_type = %alert.kind,
                "failed to store alert"
            );
            return None;
        }

        tracing::info!(
            sensor_id = %alert.sensor_id,
            alert_type = %alert.kind,
            severity = alert.severity.as_str(),
            escalation_level,
            "alert created"
        );
        self.hub.publish_alert(&alert);
        Some(alert)
    }
}
