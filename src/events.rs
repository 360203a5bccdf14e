//! Real-time fan-out of readings and alert changes.
//!
//! Three kinds of channel, all `tokio::sync::broadcast`:
//! - a global feed carrying `sensor:data` for every accepted reading,
//! - a global alerts channel (`alert:new`, `alert:acknowledged`, `alert:resolved`),
//! - one channel per sensor (`reading:update`, `alert:new`), created on first subscription.
//!
//! Publishing never blocks and never fails: with no subscribers the event is dropped.
//! [`EventHub::close`] tells long-lived subscribers to hang up at shutdown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::models::{Alert, StoredReading};

const CHANNEL_CAPACITY: usize = 256;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "reading:update")]
    ReadingUpdate,
    #[serde(rename = "sensor:data")]
    SensorData,
    #[serde(rename = "alert:new")]
    AlertNew,
    #[serde(rename = "alert:acknowledged")]
    AlertAcknowledged,
    #[serde(rename = "alert:resolved")]
    AlertResolved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ReadingUpdate => "reading:update",
            EventKind::SensorData => "sensor:data",
            EventKind::AlertNew => "alert:new",
            EventKind::AlertAcknowledged => "alert:acknowledged",
            EventKind::AlertResolved => "alert:resolved",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub sensor_id: String,
    pub data: Value,
}

impl Event {
    fn new(kind: EventKind, sensor_id: &str, data: impl Serialize) -> Self {
        Self {
            kind,
            sensor_id: sensor_id.to_string(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

pub struct EventHub {
    feed: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
    sensors: Mutex<HashMap<String, broadcast::Sender<Event>>>,
    closing: watch::Sender<bool>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        // ---
        let (feed, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (alerts, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (closing, _) = watch::channel(false);
        Self {
            feed,
            alerts,
            sensors: Mutex::new(HashMap::new()),
            closing,
        }
    }

    pub fn subscribe_feed(&self) -> broadcast::Receiver<Event> {
        self.feed.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Event> {
        self.alerts.subscribe()
    }

    /// Join the room of one sensor.
    pub fn subscribe_sensor(&self, sensor_id: &str) -> broadcast::Receiver<Event> {
        // ---
        self.lock_sensors()
            .entry(sensor_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn publish_reading(&self, stored: &StoredReading) {
        // ---
        let sensor_id = &stored.reading.sensor_id;
        self.to_sensor(Event::new(EventKind::ReadingUpdate, sensor_id, stored));
        let _ = self
            .feed
            .send(Event::new(EventKind::SensorData, sensor_id, stored));
    }

    pub fn publish_alert(&self, alert: &Alert) {
        // ---
        let event = Event::new(EventKind::AlertNew, &alert.sensor_id, alert);
        self.to_sensor(event.clone());
        let _ = self.alerts.send(event);
    }

    /// Announce an acknowledge/resolve on the global alerts channel.
    pub fn publish_alert_change(&self, kind: EventKind, alert: &Alert) {
        let _ = self.alerts.send(Event::new(kind, &alert.sensor_id, alert));
    }

    /// Flips to `true` once the hub is closing.
    pub fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }

    pub fn close(&self) {
        self.closing.send_replace(true);
    }

    /// Drop sensor channels nobody listens to; returns how many were removed.
    pub fn prune(&self) -> usize {
        // ---
        let mut sensors = self.lock_sensors();
        let before = sensors.len();
        sensors.retain(|_, tx| tx.receiver_count() > 0);
        before - sensors.len()
    }

    fn to_sensor(&self, event: Event) {
        if let Some(tx) = self.lock_sensors().get(&event.sensor_id) {
            let _ = tx.send(event);
        }
    }

    fn lock_sensors(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Event>>> {
        self.sensors.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{Reading, WireFormat};
    use chrono::Utc;
    use uuid::Uuid;

    fn stored(sensor_id: &str) -> StoredReading {
        StoredReading {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            reading: Reading {
                sensor_id: sensor_id.into(),
                gateway_id: None,
                timestamp: Utc::now(),
                water_level_cm: 10.0,
                rain_accumulated_mm: 0.0,
                flow_rate_lmin: 0.0,
                temperature_c: 20.0,
                humidity_percent: 50.0,
                battery_percent: 100.0,
                signal: None,
                seq: None,
                format: WireFormat::Legacy,
            },
        }
    }

    #[tokio::test]
    async fn test_reading_reaches_sensor_room_and_feed() {
        // ---
        let hub = EventHub::new();
        let mut room = hub.subscribe_sensor("S1");
        let mut other = hub.subscribe_sensor("S2");
        let mut feed = hub.subscribe_feed();

        hub.publish_reading(&stored("S1"));

        let event = room.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::ReadingUpdate);
        assert_eq!(event.data["sensor_id"], "S1");
        assert_eq!(feed.recv().await.unwrap().kind, EventKind::SensorData);
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        // ---
        let hub = EventHub::new();
        hub.publish_reading(&stored("S1"));
        assert_eq!(hub.prune(), 0);
    }

    #[test]
    fn test_prune_drops_abandoned_rooms() {
        // ---
        let hub = EventHub::new();
        let kept = hub.subscribe_sensor("S1");
        drop(hub.subscribe_sensor("S2"));
        assert_eq!(hub.prune(), 1);
        drop(kept);
        assert_eq!(hub.prune(), 1);
    }

    #[tokio::test]
    async fn test_close_reaches_existing_watchers() {
        // ---
        let hub = EventHub::new();
        let mut closing = hub.closing();
        assert!(!*closing.borrow());

        hub.close();
        closing.changed().await.unwrap();
        assert!(*closing.borrow());
        assert!(*hub.closing().borrow());
    }
}
