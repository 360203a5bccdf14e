//! Periodic housekeeping: alert retention, gateway liveness, expiry of
//! in-process state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::cache::MemoryCache;
use crate::events::EventHub;
use crate::ingest::SensorRateLimiter;
use crate::store::{self, Store};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub purged_alerts: u64,
    pub offline_gateways: u64,
    pub expired_keys: usize,
    pub pruned_rooms: usize,
    pub pruned_limits: usize,
}

pub struct Sweeper {
    store: Arc<dyn Store>,
    cache: Arc<MemoryCache>,
    hub: Arc<EventHub>,
    limiter: Arc<SensorRateLimiter>,
    retention: Duration,
    offline_after: Duration,
    timeout: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<MemoryCache>,
        hub: Arc<EventHub>,
        limiter: Arc<SensorRateLimiter>,
        retention: Duration,
        offline_after: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            hub,
            limiter,
            retention,
            offline_after,
            timeout,
        }
    }

    /// One pass. Each step is independent; a failing step is logged and skipped.
    pub async fn sweep(&self) -> SweepReport {
        // ---
        let now = Utc::now();
        let mut report = SweepReport::default();

        // A lookback reaching before the representable range has nothing to sweep.
        if let Some(cutoff) = store::before(now, self.retention) {
            match store::bounded(self.timeout, self.store.purge_alerts_before(cutoff)).await {
                Ok(n) => report.purged_alerts = n,
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "alert retention sweep failed")
                }
            }
        }

        if let Some(silent_since) = store::before(now, self.offline_after) {
            let offline = self.store.mark_gateways_offline(silent_since);
            match store::bounded(self.timeout, offline).await {
                Ok(n) => report.offline_gateways = n,
                Err(e) => {
                    tracing::warn!(error = %format!("{e:#}"), "gateway liveness sweep failed")
                }
            }
        }

        report.expired_keys = self.cache.purge_expired();
        report.pruned_rooms = self.hub.prune();
        report.pruned_limits = self.limiter.prune();

        if report != SweepReport::default() {
            tracing::debug!(?report, "maintenance sweep");
        }
        report
    }

    /// Sweep every `period` until the task is aborted.
    pub async fn run(self, period: Duration) {
        // ---
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::cache::EphemeralCache;
    use crate::models::{Alert, AlertKind, AlertStatus, GatewayStatus, Severity};
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    fn sweeper(store: Arc<MemoryStore>, cache: Arc<MemoryCache>) -> Sweeper {
        sweeper_with_retention(store, cache, Duration::from_secs(7_776_000))
    }

    fn sweeper_with_retention(
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        retention: Duration,
    ) -> Sweeper {
        Sweeper::new(
            store,
            cache,
            Arc::new(EventHub::new()),
            Arc::new(SensorRateLimiter::new(Duration::from_secs(60), 20)),
            retention,
            Duration::from_secs(600),
            Duration::from_secs(3),
        )
    }

    fn alert_detected(days_ago: i64) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            sensor_id: "S1".into(),
            gateway_id: None,
            kind: AlertKind::RainfallHeavy,
            severity: Severity::Warning,
            value: 60.0,
            threshold: 50.0,
            message: "Heavy rainfall: 60mm (threshold: 50mm)".into(),
            detected_at: Utc::now() - chrono::Duration::days(days_ago),
            status: AlertStatus::Resolved,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            escalation_level: 0,
        }
    }

    #[tokio::test]
    async fn test_alerts_past_retention_are_purged() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_alert(&alert_detected(91)).await.unwrap();
        store.insert_alert(&alert_detected(89)).await.unwrap();

        let report = sweeper(Arc::clone(&store), Arc::new(MemoryCache::new()))
            .sweep()
            .await;
        assert_eq!(report.purged_alerts, 1);
        assert_eq!(store.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_gateways_go_offline() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store
            .touch_gateway("GW_OLD", Utc::now() - chrono::Duration::minutes(30))
            .await
            .unwrap();
        store.touch_gateway("GW_NEW", Utc::now()).await.unwrap();

        let report = sweeper(Arc::clone(&store), Arc::new(MemoryCache::new()))
            .sweep()
            .await;
        assert_eq!(report.offline_gateways, 1);

        let old = store.gateway("GW_OLD").await.unwrap().unwrap();
        assert_eq!(old.status, GatewayStatus::Offline);

        // a new reading brings it back
        store.touch_gateway("GW_OLD", Utc::now()).await.unwrap();
        let old = store.gateway("GW_OLD").await.unwrap().unwrap();
        assert_eq!(old.status, GatewayStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cache_keys_are_dropped() {
        // ---
        let cache = Arc::new(MemoryCache::new());
        cache
            .set_with_ttl("reading:S1:1", "x", Duration::from_secs(300))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        let report = sweeper(Arc::new(MemoryStore::new()), cache).sweep().await;
        assert_eq!(report.expired_keys, 1);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_sweep() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let cache = Arc::new(MemoryCache::new());

        let report = sweeper(store, cache).sweep().await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_retention_beyond_calendar_keeps_alerts() {
        // ---
        let store = Arc::new(MemoryStore::new());
        store.insert_alert(&alert_detected(3650)).await.unwrap();

        let report = sweeper_with_retention(
            Arc::clone(&store),
            Arc::new(MemoryCache::new()),
            Duration::from_secs(u64::MAX),
        )
        .sweep()
        .await;
        assert_eq!(report.purged_alerts, 0);
        assert_eq!(store.alerts().len(), 1);
    }
}
