//! In-memory [`Store`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{PersistedReading, Store, Transition};
use crate::models::{
    Alert, AlertFilter, AlertKind, AlertStatus, Gateway, GatewayRegistration, GatewayStatus,
    MetricSummary, Reading, SensorConfig, SensorStats, StoredReading,
};

#[derive(Default)]
struct Inner {
    readings: Vec<StoredReading>,
    gateways: HashMap<String, Gateway>,
    sensors: HashMap<String, SensorConfig>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
    gateways_failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(self, config: SensorConfig) -> Self {
        self.lock().sensors.insert(config.sensor_id.clone(), config);
        self
    }

    /// Make every subsequent call fail, as if the database were down.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only gateway bookkeeping.
    pub fn set_gateways_failing(&self, failing: bool) {
        self.gateways_failing.store(failing, Ordering::SeqCst);
    }

    pub fn readings(&self) -> Vec<StoredReading> {
        self.lock().readings.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    pub fn gateways(&self) -> Vec<Gateway> {
        self.lock().gateways.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }
}

fn summarize(values: impl Iterator<Item = f64> + Clone) -> MetricSummary {
    // ---
    let count = values.clone().count().max(1) as f64;
    MetricSummary {
        min: values.clone().fold(f64::INFINITY, f64::min),
        avg: values.clone().sum::<f64>() / count,
        max: values.fold(f64::NEG_INFINITY, f64::max),
    }
}

fn newest_first(mut readings: Vec<StoredReading>, limit: u32) -> Vec<StoredReading> {
    readings.sort_by(|a, b| b.reading.timestamp.cmp(&a.reading.timestamp));
    readings.truncate(limit as usize);
    readings
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<PersistedReading> {
        // ---
        self.check()?;
        let persisted = PersistedReading {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
        };
        self.lock().readings.push(StoredReading {
            id: persisted.id,
            received_at: persisted.received_at,
            reading: reading.clone(),
        });
        Ok(persisted)
    }

    async fn reading_exists_near(
        &self,
        sensor_id: &str,
        timestamp: DateTime<Utc>,
        radius: Duration,
        received_since: DateTime<Utc>,
    ) -> Result<bool> {
        // ---
        self.check()?;
        let radius = chrono::Duration::from_std(radius)?;
        Ok(self.lock().readings.iter().any(|r| {
            r.reading.sensor_id == sensor_id
                && (r.reading.timestamp - timestamp).abs() <= radius
                && r.received_at >= received_since
        }))
    }

    async fn recent_readings(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredReading>> {
        // ---
        self.check()?;
        let matching = self
            .lock()
            .readings
            .iter()
            .filter(|r| r.reading.sensor_id == sensor_id && r.reading.timestamp >= since)
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn latest_reading(&self, sensor_id: &str) -> Result<Option<StoredReading>> {
        // ---
        self.check()?;
        Ok(self
            .lock()
            .readings
            .iter()
            .filter(|r| r.reading.sensor_id == sensor_id)
            .max_by_key(|r| r.reading.timestamp)
            .cloned())
    }

    async fn readings_by_gateway(
        &self,
        gateway_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredReading>> {
        // ---
        self.check()?;
        let matching = self
            .lock()
            .readings
            .iter()
            .filter(|r| r.reading.gateway_id.as_deref() == Some(gateway_id))
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn sensor_stats(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SensorStats>> {
        // ---
        self.check()?;
        let inner = self.lock();
        let window: Vec<&Reading> = inner
            .readings
            .iter()
            .map(|r| &r.reading)
            .filter(|r| r.sensor_id == sensor_id && r.timestamp >= since)
            .collect();
        if window.is_empty() {
            return Ok(None);
        }

        let it = || window.iter();
        Ok(Some(SensorStats {
            count: window.len() as i64,
            water_level_cm: summarize(it().map(|r| r.water_level_cm)),
            rain_accumulated_mm: summarize(it().map(|r| r.rain_accumulated_mm)),
            total_rain_mm: it().map(|r| r.rain_accumulated_mm).sum(),
            flow_rate_lmin: summarize(it().map(|r| r.flow_rate_lmin)),
            temperature_c: summarize(it().map(|r| r.temperature_c)),
            humidity_percent: summarize(it().map(|r| r.humidity_percent)),
            battery_percent: summarize(it().map(|r| r.battery_percent)),
        }))
    }

    async fn touch_gateway(&self, gateway_id: &str, seen_at: DateTime<Utc>) -> Result<()> {
        // ---
        self.check()?;
        if self.gateways_failing.load(Ordering::SeqCst) {
            bail!("gateway update failed");
        }
        let mut inner = self.lock();
        let gateway = inner
            .gateways
            .entry(gateway_id.to_string())
            .or_insert_with(|| Gateway {
                gateway_id: gateway_id.to_string(),
                name: format!("Gateway {gateway_id}"),
                location: None,
                status: GatewayStatus::Online,
                last_seen: seen_at,
                reading_count: 0,
                registered_at: None,
            });
        gateway.status = GatewayStatus::Online;
        gateway.last_seen = gateway.last_seen.max(seen_at);
        gateway.reading_count += 1;
        Ok(())
    }

    async fn register_gateway(&self, registration: &GatewayRegistration) -> Result<Gateway> {
        // ---
        self.check()?;
        let now = Utc::now();
        let mut inner = self.lock();
        let name = registration
            .name
            .clone()
            .unwrap_or_else(|| format!("Gateway {}", registration.gateway_id));
        let gateway = inner
            .gateways
            .entry(registration.gateway_id.clone())
            .or_insert_with(|| Gateway {
                gateway_id: registration.gateway_id.clone(),
                name: name.clone(),
                location: None,
                status: GatewayStatus::Online,
                last_seen: now,
                reading_count: 0,
                registered_at: None,
            });
        gateway.name = name;
        gateway.location = registration.location;
        gateway.status = GatewayStatus::Online;
        gateway.last_seen = gateway.last_seen.max(now);
        gateway.registered_at = Some(now);
        Ok(gateway.clone())
    }

    async fn gateway(&self, gateway_id: &str) -> Result<Option<Gateway>> {
        self.check()?;
        Ok(self.lock().gateways.get(gateway_id).cloned())
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>> {
        // ---
        self.check()?;
        let mut all = self.gateways();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(all)
    }

    async fn mark_gateways_offline(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // ---
        self.check()?;
        let mut changed = 0;
        for gateway in self.lock().gateways.values_mut() {
            if gateway.status == GatewayStatus::Online && gateway.last_seen < cutoff {
                gateway.status = GatewayStatus::Offline;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn sensor_config(&self, sensor_id: &str) -> Result<Option<SensorConfig>> {
        self.check()?;
        Ok(self.lock().sensors.get(sensor_id).cloned())
    }

    async fn enabled_sensor_configs(&self) -> Result<Vec<SensorConfig>> {
        // ---
        self.check()?;
        let mut enabled: Vec<SensorConfig> = self
            .lock()
            .sensors
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        Ok(enabled)
    }

    async fn upsert_sensor_config(&self, config: &SensorConfig) -> Result<SensorConfig> {
        // ---
        self.check()?;
        self.lock()
            .sensors
            .insert(config.sensor_id.clone(), config.clone());
        Ok(config.clone())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.check()?;
        self.lock().alerts.push(alert.clone());
        Ok(())
    }

    async fn count_active_alerts(&self, sensor_id: &str, kind: AlertKind) -> Result<i64> {
        // ---
        self.check()?;
        Ok(self
            .lock()
            .alerts
            .iter()
            .filter(|a| {
                a.sensor_id == sensor_id && a.kind == kind && a.status == AlertStatus::Active
            })
            .count() as i64)
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        // ---
        self.check()?;
        let mut matching: Vec<Alert> = self
            .lock()
            .alerts
            .iter()
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.sensor_id.as_ref().map_or(true, |s| &a.sensor_id == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        matching.truncate(filter.limit.unwrap_or(100) as usize);
        Ok(matching)
    }

    async fn acknowledge_alert(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        // ---
        self.check()?;
        let mut inner = self.lock();
        let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(Transition::NotFound);
        };
        if alert.status != AlertStatus::Active {
            return Ok(Transition::Rejected(alert.clone()));
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(at);
        alert.acknowledged_by = Some(by.to_string());
        Ok(Transition::Applied(alert.clone()))
    }

    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Transition> {
        // ---
        self.check()?;
        let mut inner = self.lock();
        let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == id) else {
            return Ok(Transition::NotFound);
        };
        if alert.status == AlertStatus::Resolved {
            return Ok(Transition::Rejected(alert.clone()));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(at);
        Ok(Transition::Applied(alert.clone()))
    }

    async fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // ---
        self.check()?;
        let mut inner = self.lock();
        let before = inner.alerts.len();
        inner.alerts.retain(|a| a.detected_at >= cutoff);
        Ok((before - inner.alerts.len()) as u64)
    }
}
