use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{PersistedReading, Store, Transition};
use crate::models::{
    Alert, AlertFilter, AlertKind, AlertStatus, Gateway, GatewayRegistration, GeoPoint,
    MetricSummary, Reading, SensorConfig, SensorStats, Signal, SignalQuality, StoredReading,
    Thresholds,
};

const READING_COLUMNS: &str = "id, sensor_id, gateway_id, ts, received_at, water_level_cm, \
     rain_accumulated_mm, flow_rate_lmin, temperature_c, humidity_percent, battery_percent, \
     rssi, snr, signal_quality, seq, wire_format";

const GATEWAY_COLUMNS: &str =
    "gateway_id, name, lat, lng, status, last_seen, reading_count, registered_at";

const SENSOR_COLUMNS: &str = "sensor_id, name, enabled, water_level_critical_cm, \
     water_level_warning_cm, rainfall_heavy_mm, flow_excessive_lmin, lat, lng";

const ALERT_COLUMNS: &str = "id, sensor_id, gateway_id, alert_type, severity, value, threshold, \
     message, detected_at, status, acknowledged_at, acknowledged_by, resolved_at, escalation_level";

const DEFAULT_ALERT_LIMIT: u32 = 100;

// ---

/// [`Store`] backed by PostgreSQL through an `sqlx` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ReadingRow {
    id: Uuid,
    sensor_id: String,
    gateway_id: Option<String>,
    ts: DateTime<Utc>,
    received_at: DateTime<Utc>,
    water_level_cm: f64,
    rain_accumulated_mm: f64,
    flow_rate_lmin: f64,
    temperature_c: f64,
    humidity_percent: f64,
    battery_percent: f64,
    rssi: Option<f64>,
    snr: Option<f64>,
    signal_quality: Option<String>,
    seq: Option<i64>,
    wire_format: String,
}

impl TryFrom<ReadingRow> for StoredReading {
    type Error = anyhow::Error;

    fn try_from(row: ReadingRow) -> Result<Self> {
        // ---
        let quality = row
            .signal_quality
            .as_deref()
            .map(str::parse::<SignalQuality>)
            .transpose()
            .map_err(|e: String| anyhow!(e))?;
        let signal = (row.rssi.is_some() || row.snr.is_some()).then_some(Signal {
            rssi: row.rssi,
            snr: row.snr,
            quality,
        });

        Ok(StoredReading {
            id: row.id,
            received_at: row.received_at,
            reading: Reading {
                sensor_id: row.sensor_id,
                gateway_id: row.gateway_id,
                timestamp: row.ts,
                water_level_cm: row.water_level_cm,
                rain_accumulated_mm: row.rain_accumulated_mm,
                flow_rate_lmin: row.flow_rate_lmin,
                temperature_c: row.temperature_c,
                humidity_percent: row.humidity_percent,
                battery_percent: row.battery_percent,
                signal,
                seq: row.seq,
                format: row.wire_format.parse().map_err(|e: String| anyhow!(e))?,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    count: i64,
    min_water: Option<f64>,
    avg_water: Option<f64>,
    max_water: Option<f64>,
    min_rain: Option<f64>,
    avg_rain: Option<f64>,
    max_rain: Option<f64>,
    total_rain: Option<f64>,
    min_flow: Option<f64>,
    avg_flow: Option<f64>,
    max_flow: Option<f64>,
    min_temp: Option<f64>,
    avg_temp: Option<f64>,
    max_temp: Option<f64>,
    min_humidity: Option<f64>,
    avg_humidity: Option<f64>,
    max_humidity: Option<f64>,
    min_battery: Option<f64>,
    avg_battery: Option<f64>,
    max_battery: Option<f64>,
}

fn summary(min: Option<f64>, avg: Option<f64>, max: Option<f64>) -> MetricSummary {
    MetricSummary {
        min: min.unwrap_or_default(),
        avg: avg.unwrap_or_default(),
        max: max.unwrap_or_default(),
    }
}

#[derive(Debug, FromRow)]
struct GatewayRow {
    gateway_id: String,
    name: String,
    lat: Option<f64>,
    lng: Option<f64>,
    status: String,
    last_seen: DateTime<Utc>,
    reading_count: i64,
    registered_at: Option<DateTime<Utc>>,
}

impl TryFrom<GatewayRow> for Gateway {
    type Error = anyhow::Error;

    fn try_from(row: GatewayRow) -> Result<Self> {
        Ok(Gateway {
            gateway_id: row.gateway_id,
            name: row.name,
            location: geo(row.lat, row.lng),
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            last_seen: row.last_seen,
            reading_count: row.reading_count,
            registered_at: row.registered_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SensorRow {
    sensor_id: String,
    name: Option<String>,
    enabled: bool,
    water_level_critical_cm: Option<f64>,
    water_level_warning_cm: Option<f64>,
    rainfall_heavy_mm: Option<f64>,
    flow_excessive_lmin: Option<f64>,
    lat: Option<f64>,
    lng: Option<f64>,
}

impl From<SensorRow> for SensorConfig {
    fn from(row: SensorRow) -> Self {
        SensorConfig {
            sensor_id: row.sensor_id,
            name: row.name,
            enabled: row.enabled,
            thresholds: Thresholds {
                water_level_critical_cm: row.water_level_critical_cm,
                water_level_warning_cm: row.water_level_warning_cm,
                rainfall_heavy_mm: row.rainfall_heavy_mm,
                flow_excessive_lmin: row.flow_excessive_lmin,
            },
            location: geo(row.lat, row.lng),
        }
    }
}

#[derive(Debug, FromRow)]
struct AlertRow {
    id: Uuid,
    sensor_id: String,
    gateway_id: Option<String>,
    alert_type: String,
    severity: String,
    value: f64,
    threshold: f64,
    message: String,
    detected_at: DateTime<Utc>,
    status: String,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    escalation_level: i32,
}

impl TryFrom<AlertRow> for Alert {
    type Error = anyhow::Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Alert {
            id: row.id,
            sensor_id: row.sensor_id,
            gateway_id: row.gateway_id,
            kind: row.alert_type.parse().map_err(|e: String| anyhow!(e))?,
            severity: row.severity.parse().map_err(|e: String| anyhow!(e))?,
            value: row.value,
            threshold: row.threshold,
            message: row.message,
            detected_at: row.detected_at,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
            resolved_at: row.resolved_at,
            escalation_level: row.escalation_level,
        })
    }
}

fn geo(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

impl PgStore {
    async fn alert_by_id(&self, id: Uuid) -> Result<Option<Alert>> {
        // ---
        let row: Option<AlertRow> =
            sqlx::query_as(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn transition(&self, id: Uuid, updated: Option<AlertRow>) -> Result<Transition> {
        // ---
        if let Some(row) = updated {
            return Ok(Transition::Applied(row.try_into()?));
        }
        Ok(match self.alert_by_id(id).await? {
            Some(alert) => Transition::Rejected(alert),
            None => Transition::NotFound,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_reading(&self, reading: &Reading) -> Result<PersistedReading> {
        // ---
        let id = Uuid::new_v4();
        let received_at = Utc::now();
        let signal = reading.signal.as_ref();

        sqlx::query(
            r#"
            INSERT INTO sensor_readings (
                id, sensor_id, gateway_id, ts, received_at,
                water_level_cm, rain_accumulated_mm, flow_rate_lmin,
                temperature_c, humidity_percent, battery_percent,
                rssi, snr, signal_quality, seq, wire_format
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(id)
        .bind(&reading.sensor_id)
        .bind(&reading.gateway_id)
        .bind(reading.timestamp)
        .bind(received_at)
        .bind(reading.water_level_cm)
        .bind(reading.rain_accumulated_mm)
        .bind(reading.flow_rate_lmin)
        .bind(reading.temperature_c)
        .bind(reading.humidity_percent)
        .bind(reading.battery_percent)
        .bind(signal.and_then(|s| s.rssi))
        .bind(signal.and_then(|s| s.snr))
        .bind(signal.and_then(|s| s.quality).map(|q| q.as_str()))
        .bind(reading.seq)
        .bind(reading.format.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert reading for {}", reading.sensor_id))?;

        Ok(PersistedReading { id, received_at })
    }

    async fn reading_exists_near(
        &self,
        sensor_id: &str,
        timestamp: DateTime<Utc>,
        radius: Duration,
        received_since: DateTime<Utc>,
    ) -> Result<bool> {
        // ---
        let window = super::before(timestamp, radius).zip(super::after(timestamp, radius));
        let Some((from, to)) = window else {
            return Err(anyhow!("match radius {radius:?} around {timestamp} is out of range"));
        };
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sensor_readings
                WHERE sensor_id = $1
                  AND ts BETWEEN $2 AND $3
                  AND received_at >= $4
            )
            "#,
        )
        .bind(sensor_id)
        .bind(from)
        .bind(to)
        .bind(received_since)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn recent_readings(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredReading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings \
             WHERE sensor_id = $1 AND ts >= $2 ORDER BY ts DESC LIMIT $3"
        ))
        .bind(sensor_id)
        .bind(since)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn latest_reading(&self, sensor_id: &str) -> Result<Option<StoredReading>> {
        // ---
        let row: Option<ReadingRow> = sqlx::query_as(&format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings \
             WHERE sensor_id = $1 ORDER BY ts DESC LIMIT 1"
        ))
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredReading::try_from).transpose()
    }

    async fn readings_by_gateway(
        &self,
        gateway_id: &str,
        limit: u32,
    ) -> Result<Vec<StoredReading>> {
        // ---
        let rows: Vec<ReadingRow> = sqlx::query_as(&format!(
            "SELECT {READING_COLUMNS} FROM sensor_readings \
             WHERE gateway_id = $1 ORDER BY ts DESC LIMIT $2"
        ))
        .bind(gateway_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn sensor_stats(
        &self,
        sensor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SensorStats>> {
        // ---
        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*)                 AS count,
                MIN(water_level_cm)      AS min_water,
                AVG(water_level_cm)      AS avg_water,
                MAX(water_level_cm)      AS max_water,
                MIN(rain_accumulated_mm) AS min_rain,
                AVG(rain_accumulated_mm) AS avg_rain,
                MAX(rain_accumulated_mm) AS max_rain,
                SUM(rain_accumulated_mm) AS total_rain,
                MIN(flow_rate_lmin)      AS min_flow,
                AVG(flow_rate_lmin)      AS avg_flow,
                MAX(flow_rate_lmin)      AS max_flow,
                MIN(temperature_c)       AS min_temp,
                AVG(temperature_c)       AS avg_temp,
                MAX(temperature_c)       AS max_temp,
                MIN(humidity_percent)    AS min_humidity,
                AVG(humidity_percent)    AS avg_humidity,
                MAX(humidity_percent)    AS max_humidity,
                MIN(battery_percent)     AS min_battery,
                AVG(battery_percent)     AS avg_battery,
                MAX(battery_percent)     AS max_battery
            FROM sensor_readings
            WHERE sensor_id = $1 AND ts >= $2
            "#,
        )
        .bind(sensor_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        if row.count == 0 {
            return Ok(None);
        }

        Ok(Some(SensorStats {
            count: row.count,
            water_level_cm: summary(row.min_water, row.avg_water, row.max_water),
            rain_accumulated_mm: summary(row.min_rain, row.avg_rain, row.max_rain),
            total_rain_mm: row.total_rain.unwrap_or_default(),
            flow_rate_lmin: summary(row.min_flow, row.avg_flow, row.max_flow),
            temperature_c: summary(row.min_temp, row.avg_temp, row.max_temp),
            humidity_percent: summary(row.min_humidity, row.avg_humidity, row.max_humidity),
            battery_percent: summary(row.min_battery, row.avg_battery, row.max_battery),
        }))
    }

    async fn touch_gateway(&self, gateway_id: &str, seen_at: DateTime<Utc>) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO gateways (gateway_id, name, status, last_seen, reading_count, updated_at)
            VALUES ($1, 'Gateway ' || $1, 'online', $2, 1, now())
            ON CONFLICT (gateway_id) DO UPDATE SET
                status        = 'online',
                last_seen     = GREATEST(gateways.last_seen, EXCLUDED.last_seen),
                reading_count = gateways.reading_count + 1,
                updated_at    = now()
            "#,
        )
        .bind(gateway_id)
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update gateway {gateway_id}"))?;

        Ok(())
    }

    async fn register_gateway(&self, registration: &GatewayRegistration) -> Result<Gateway> {
        // ---
        let name = registration
            .name
            .clone()
            .unwrap_or_else(|| format!("Gateway {}", registration.gateway_id));
        let location = registration.location;

        let row: GatewayRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO gateways (
                gateway_id, name, lat, lng, status, last_seen, reading_count,
                registered_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'online', now(), 0, now(), now())
            ON CONFLICT (gateway_id) DO UPDATE SET
                name          = EXCLUDED.name,
                lat           = EXCLUDED.lat,
                lng           = EXCLUDED.lng,
                status        = 'online',
                last_seen     = GREATEST(gateways.last_seen, EXCLUDED.last_seen),
                registered_at = EXCLUDED.registered_at,
                updated_at    = now()
            RETURNING {GATEWAY_COLUMNS}
            "#
        ))
        .bind(&registration.gateway_id)
        .bind(name)
        .bind(location.map(|l| l.lat))
        .bind(location.map(|l| l.lng))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn gateway(&self, gateway_id: &str) -> Result<Option<Gateway>> {
        // ---
        let row: Option<GatewayRow> = sqlx::query_as(&format!(
            "SELECT {GATEWAY_COLUMNS} FROM gateways WHERE gateway_id = $1"
        ))
        .bind(gateway_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Gateway::try_from).transpose()
    }

    async fn list_gateways(&self) -> Result<Vec<Gateway>> {
        // ---
        let rows: Vec<GatewayRow> = sqlx::query_as(&format!(
            "SELECT {GATEWAY_COLUMNS} FROM gateways ORDER BY last_seen DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn mark_gateways_offline(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // ---
        let result = sqlx::query(
            r#"
            UPDATE gateways
            SET status = 'offline', updated_at = now()
            WHERE status = 'online' AND last_seen < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn sensor_config(&self, sensor_id: &str) -> Result<Option<SensorConfig>> {
        // ---
        let row: Option<SensorRow> = sqlx::query_as(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE sensor_id = $1"
        ))
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SensorConfig::from))
    }

    async fn enabled_sensor_configs(&self) -> Result<Vec<SensorConfig>> {
        // ---
        let rows: Vec<SensorRow> = sqlx::query_as(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE enabled ORDER BY sensor_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SensorConfig::from).collect())
    }

    async fn upsert_sensor_config(&self, config: &SensorConfig) -> Result<SensorConfig> {
        // ---
        let t = &config.thresholds;
        let row: SensorRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO sensors (
                sensor_id, name, enabled,
                water_level_critical_cm, water_level_warning_cm,
                rainfall_heavy_mm, flow_excessive_lmin, lat, lng, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (sensor_id) DO UPDATE SET
                name                    = EXCLUDED.name,
                enabled                 = EXCLUDED.enabled,
                water_level_critical_cm = EXCLUDED.water_level_critical_cm,
                water_level_warning_cm  = EXCLUDED.water_level_warning_cm,
                rainfall_heavy_mm       = EXCLUDED.rainfall_heavy_mm,
                flow_excessive_lmin     = EXCLUDED.flow_excessive_lmin,
                lat                     = EXCLUDED.lat,
                lng                     = EXCLUDED.lng,
                updated_at              = now()
            RETURNING {SENSOR_COLUMNS}
            "#
        ))
        .bind(&config.sensor_id)
        .bind(&config.name)
        .bind(config.enabled)
        .bind(t.water_level_critical_cm)
        .bind(t.water_level_warning_cm)
        .bind(t.rainfall_heavy_mm)
        .bind(t.flow_excessive_lmin)
        .bind(config.location.map(|l| l.lat))
        .bind(config.location.map(|l| l.lng))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, sensor_id, gateway_id, alert_type, severity, value, threshold,
                message, detected_at, status, acknowledged_at, acknowledged_by,
                resolved_at, escalation_level
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.sensor_id)
        .bind(&alert.gateway_id)
        .bind(alert.kind.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.value)
        .bind(alert.threshold)
        .bind(&alert.message)
        .bind(alert.detected_at)
        .bind(alert.status.as_str())
        .bind(alert.acknowledged_at)
        .bind(&alert.acknowledged_by)
        .bind(alert.resolved_at)
        .bind(alert.escalation_level)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert {} alert for {}", alert.kind, alert.sensor_id))?;

        Ok(())
    }

    async fn count_active_alerts(&self, sensor_id: &str, kind: AlertKind) -> Result<i64> {
        // ---
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alerts WHERE sensor_id = $1 AND alert_type = $2 AND status = $3",
        )
        .bind(sensor_id)
        .bind(kind.as_str())
        .bind(AlertStatus::Active.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        // ---
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE TRUE"));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(sensor_id) = &filter.sensor_id {
            qb.push(" AND sensor_id = ").push_bind(sensor_id.clone());
        }
        qb.push(" ORDER BY detected_at DESC LIMIT ")
            .push_bind(i64::from(filter.limit.unwrap_or(DEFAULT_ALERT_LIMIT)));

        let rows: Vec<AlertRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        convert_all(rows)
    }

    async fn acknowledge_alert(
        &self,
        id: Uuid,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        // ---
        let updated: Option<AlertRow> = sqlx::query_as(&format!(
            r#"
            UPDATE alerts
            SET status = 'ACKNOWLEDGED', acknowledged_at = $2, acknowledged_by = $3
            WHERE id = $1 AND status = 'ACTIVE'
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .bind(by)
        .fetch_optional(&self.pool)
        .await?;

        self.transition(id, updated).await
    }

    async fn resolve_alert(&self, id: Uuid, at: DateTime<Utc>) -> Result<Transition> {
        // ---
        let updated: Option<AlertRow> = sqlx::query_as(&format!(
            r#"
            UPDATE alerts
            SET status = 'RESOLVED', resolved_at = $2
            WHERE id = $1 AND status IN ('ACTIVE', 'ACKNOWLEDGED')
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        self.transition(id, updated).await
    }

    async fn purge_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // ---
        let result = sqlx::query("DELETE FROM alerts WHERE detected_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
