//! Alert evaluation engine and its background worker.
//!
//! Accepted readings are queued by the ingest path and evaluated here, off
//! the request task. For each reading the engine loads the sensor's
//! configuration and its recent history, runs the [`rules`], and hands every
//! candidate to the [`AlertDispatcher`]. Any failure along the way is logged
//! and ends evaluation for that reading without alerts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::models::{Alert, Reading};
use crate::store::{self, Store};

mod dispatch;
pub mod rules;
pub mod trend;

pub use dispatch::AlertDispatcher;

/// History considered for trend analysis.
const HISTORY_WINDOW_MINUTES: i64 = 30;
const HISTORY_LIMIT: u32 = 10;

// ---

pub struct AlertEngine {
    store: Arc<dyn Store>,
    dispatcher: AlertDispatcher,
    timeout: Duration,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn Store>, dispatcher: AlertDispatcher, timeout: Duration) -> Self {
        Self {
            store,
            dispatcher,
            timeout,
        }
    }

    /// Evaluate one reading and return the alerts that were created.
    pub async fn process(&self, reading: &Reading) -> Vec<Alert> {
        // ---
        let sensor_id = reading.sensor_id.as_str();

        let config = match store::bounded(self.timeout, self.store.sensor_config(sensor_id)).await
        {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    sensor_id,
                    error = %format!("{e:#}"),
                    "sensor config unavailable; skipping evaluation"
                );
                return Vec::new();
            }
        };
        if !config.as_ref().is_some_and(|c| c.enabled) {
            return Vec::new();
        }

        let since = Utc::now() - chrono::Duration::minutes(HISTORY_WINDOW_MINUTES);
        let history = match store::bounded(
            self.timeout,
            self.store.recent_readings(sensor_id, since, HISTORY_LIMIT),
        )
        .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    sensor_id,
                    error = %format!("{e:#}"),
                    "history unavailable; skipping evaluation"
                );
                return Vec::new();
            }
        };

        let mut created = Vec::new();
        for candidate in rules::evaluate(reading, config.as_ref(), &history) {
            if let Some(alert) = self.dispatcher.dispatch(reading, candidate).await {
                created.push(alert);
            }
        }
        created
    }
}

// ---

/// Sending half of the evaluation queue, held by the ingest path.
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::UnboundedSender<Reading>,
}

impl AlertQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Reading>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Schedule evaluation of an accepted reading. Never blocks.
    pub fn enqueue(&self, reading: Reading) {
        // ---
        if let Err(rejected) = self.tx.send(reading) {
            tracing::warn!(
                sensor_id = %rejected.0.sensor_id,
                "alert worker stopped; reading not evaluated"
            );
        }
    }
}

/// Drain the queue, evaluating each reading in its own task.
///
/// A panicking evaluation is contained in its task and logged here. Returns
/// once every sender is gone and the in-flight evaluations have finished.
pub async fn run_worker(engine: Arc<AlertEngine>, mut rx: mpsc::UnboundedReceiver<Reading>) {
    // ---
    let mut jobs = JoinSet::new();

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(reading) = next else { break };
                let engine = Arc::clone(&engine);
                jobs.spawn(async move { engine.process(&reading).await.len() });
            }
            Some(done) = jobs.join_next(), if !jobs.is_empty() => {
                if let Err(e) = done {
                    tracing::error!(error = %e, "alert evaluation task failed");
                }
            }
        }
    }

    while let Some(done) = jobs.join_next().await {
        if let Err(e) = done {
            tracing::error!(error = %e, "alert evaluation task failed");
        }
    }
    tracing::info!("alert worker stopped");
}

#[cfg(test)]
mod tests {
    // ---
    use super::rules::fixtures::{config, reading};
    use super::*;
    use crate::cache::testing::{down_guard, memory_guard};
    use crate::cache::CacheGuard;
    use crate::events::{EventHub, EventKind};
    use crate::models::{AlertKind, AlertStatus, Severity};
    use crate::store::memory::MemoryStore;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn engine(store: Arc<MemoryStore>, cache: CacheGuard) -> (AlertEngine, Arc<EventHub>) {
        let hub = Arc::new(EventHub::new());
        let store: Arc<dyn Store> = store;
        let dispatcher = AlertDispatcher::new(
            Arc::clone(&store),
            cache,
            Arc::clone(&hub),
            COOLDOWN,
            Duration::from_secs(3),
        );
        (
            AlertEngine::new(store, dispatcher, Duration::from_secs(3)),
            hub,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_alert_suppressed_within_cooldown() {
        // ---
        let store = Arc::new(MemoryStore::new().with_sensor(config("SENSOR_001")));
        let (engine, _hub) = engine(Arc::clone(&store), memory_guard());
        let high = reading("SENSOR_001", 480.0);

        assert_eq!(engine.process(&high).await.len(), 1);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(engine.process(&high).await.is_empty());
        assert_eq!(store.alerts().len(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        let again = engine.process(&high).await;
        assert_eq!(again.len(), 1);

        let alerts = store.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(alerts
            .iter()
            .all(|a| a.kind == AlertKind::WaterLevelCritical && a.severity == Severity::Critical));
        // the first is still active, so the repeat escalates
        assert_eq!(again[0].escalation_level, 1);
    }

    #[tokio::test]
    async fn test_disabled_or_unconfigured_sensor_never_alerts() {
        // ---
        let mut disabled = config("S_OFF");
        disabled.enabled = false;
        let store = Arc::new(MemoryStore::new().with_sensor(disabled));
        let (engine, _hub) = engine(Arc::clone(&store), memory_guard());

        let mut extreme = reading("S_OFF", 500.0);
        extreme.rain_accumulated_mm = 9_000.0;
        extreme.flow_rate_lmin = 9_000.0;
        assert!(engine.process(&extreme).await.is_empty());

        extreme.sensor_id = "S_UNKNOWN".into();
        assert!(engine.process(&extreme).await.is_empty());
        assert!(store.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_cache_down_lets_alerts_through() {
        // ---
        let store = Arc::new(MemoryStore::new().with_sensor(config("S1")));
        let (engine, _hub) = engine(Arc::clone(&store), down_guard());

        engine.process(&reading("S1", 480.0)).await;
        engine.process(&reading("S1", 480.0)).await;
        assert_eq!(store.alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_yields_no_alerts() {
        // ---
        let store = Arc::new(MemoryStore::new().with_sensor(config("S1")));
        let (engine, hub) = engine(Arc::clone(&store), memory_guard());
        let mut alerts_rx = hub.subscribe_alerts();

        store.set_failing(true);
        assert!(engine.process(&reading("S1", 480.0)).await.is_empty());
        assert!(alerts_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_new_alert_is_broadcast_to_room_and_global_channel() {
        // ---
        let store = Arc::new(MemoryStore::new().with_sensor(config("S1")));
        let (engine, hub) = engine(Arc::clone(&store), memory_guard());
        let mut room = hub.subscribe_sensor("S1");
        let mut global = hub.subscribe_alerts();

        engine.process(&reading("S1", 480.0)).await;

        let event = room.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::AlertNew);
        assert_eq!(event.data["type"], "WATER_LEVEL_CRITICAL");
        assert_eq!(global.recv().await.unwrap().data["value"], 480.0);
        assert_eq!(store.alerts()[0].status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn test_worker_drains_queue_before_stopping() {
        // ---
        let store = Arc::new(MemoryStore::new().with_sensor(config("S1")));
        let (engine, _hub) = engine(Arc::clone(&store), memory_guard());
        let (queue, rx) = AlertQueue::new();
        let worker = tokio::spawn(run_worker(Arc::new(engine), rx));

        queue.enqueue(reading("S1", 480.0));
        drop(queue);
        tokio_test::assert_ok!(worker.await);

        assert_eq!(store.alerts().len(), 1);
    }
}
