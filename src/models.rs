//! Data models for the ingestion and alerting pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Wire shape a reading arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Newer gateway firmware: metric units, Spanish field names, optional `seq`.
    Gateway,
    /// Original field names (`water_level_cm`, `flow_rate_lmin`, ...).
    Legacy,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Gateway => "gateway",
            WireFormat::Legacy => "legacy",
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gateway" => Ok(WireFormat::Gateway),
            "legacy" => Ok(WireFormat::Legacy),
            other => Err(format!("unknown wire format '{other}'")),
        }
    }
}

/// Radio-link quality bucket derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SignalQuality {
    /// Bucket an RSSI value: >= -80 excellent, >= -100 good, >= -120 fair, else poor.
    pub fn from_rssi(rssi: f64) -> Self {
        // ---
        if rssi >= -80.0 {
            SignalQuality::Excellent
        } else if rssi >= -100.0 {
            SignalQuality::Good
        } else if rssi >= -120.0 {
            SignalQuality::Fair
        } else {
            SignalQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::Excellent => "excellent",
            SignalQuality::Good => "good",
            SignalQuality::Fair => "fair",
            SignalQuality::Poor => "poor",
        }
    }
}

impl FromStr for SignalQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "excellent" => Ok(SignalQuality::Excellent),
            "good" => Ok(SignalQuality::Good),
            "fair" => Ok(SignalQuality::Fair),
            "poor" => Ok(SignalQuality::Poor),
            other => Err(format!("unknown signal quality '{other}'")),
        }
    }
}

/// LoRa link metrics reported by the gateway alongside a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub rssi: Option<f64>,
    pub snr: Option<f64>,
    /// Present only when `rssi` is.
    pub quality: Option<SignalQuality>,
}

/// Canonical sensor observation produced by the normalizer.
///
/// Immutable once created; later readings of the same sensor supersede it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub sensor_id: String,
    pub gateway_id: Option<String>,
    /// Sensor-reported instant, normalized to UTC.
    pub timestamp: DateTime<Utc>,
    pub water_level_cm: f64,
    pub rain_accumulated_mm: f64,
    pub flow_rate_lmin: f64,
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub battery_percent: f64,
    pub signal: Option<Signal>,
    /// Device sequence number (gateway format only).
    pub seq: Option<i64>,
    pub format: WireFormat,
}

/// A reading as held by the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: Uuid,
    /// Server-assigned ingestion instant, distinct from the sensor timestamp.
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Latitude/longitude pair used by sensors and gateways.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Per-sensor alert thresholds. A missing threshold disables the rules that need it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub water_level_critical_cm: Option<f64>,
    pub water_level_warning_cm: Option<f64>,
    pub rainfall_heavy_mm: Option<f64>,
    pub flow_excessive_lmin: Option<f64>,
}

impl Thresholds {
    pub fn is_empty(&self) -> bool {
        self.water_level_critical_cm.is_none()
            && self.water_level_warning_cm.is_none()
            && self.rainfall_heavy_mm.is_none()
            && self.flow_excessive_lmin.is_none()
    }
}

/// Administrative configuration for one sensor; read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub sensor_id: String,
    pub name: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: Thresholds,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Online,
    Offline,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Online => "online",
            GatewayStatus::Offline => "offline",
        }
    }
}

impl FromStr for GatewayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(GatewayStatus::Online),
            "offline" => Ok(GatewayStatus::Offline),
            other => Err(format!("unknown gateway status '{other}'")),
        }
    }
}

/// Bookkeeping for a relay gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gateway {
    pub gateway_id: String,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub status: GatewayStatus,
    /// Never moves backwards.
    pub last_seen: DateTime<Utc>,
    pub reading_count: i64,
    pub registered_at: Option<DateTime<Utc>>,
}

/// Administrative registration of a gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRegistration {
    pub gateway_id: String,
    pub name: Option<String>,
    pub location: Option<GeoPoint>,
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    WaterLevelCritical,
    /// Water level above warning and rising fast.
    #[serde(rename = "WATER_LEVEL_HIGH")]
    WaterLevelHighTrend,
    RainfallHeavy,
    FlowExcessive,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::WaterLevelCritical => "WATER_LEVEL_CRITICAL",
            AlertKind::WaterLevelHighTrend => "WATER_LEVEL_HIGH",
            AlertKind::RainfallHeavy => "RAINFALL_HEAVY",
            AlertKind::FlowExcessive => "FLOW_EXCESSIVE",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WATER_LEVEL_CRITICAL" => Ok(AlertKind::WaterLevelCritical),
            "WATER_LEVEL_HIGH" => Ok(AlertKind::WaterLevelHighTrend),
            "RAINFALL_HEAVY" => Ok(AlertKind::RainfallHeavy),
            "FLOW_EXCESSIVE" => Ok(AlertKind::FlowExcessive),
            other => Err(format!("unknown alert type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AlertStatus::Active),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

/// A persisted flood-risk alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub id: Uuid,
    pub sensor_id: String,
    pub gateway_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    /// Observed value that triggered the alert.
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub detected_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub escalation_level: i32,
}

/// Filter for alert listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub sensor_id: Option<String>,
    pub limit: Option<u32>,
}

/// min/avg/max of one metric over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

/// Aggregate statistics for one sensor over a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStats {
    pub count: i64,
    pub water_level_cm: MetricSummary,
    pub rain_accumulated_mm: MetricSummary,
    pub total_rain_mm: f64,
    pub flow_rate_lmin: MetricSummary,
    pub temperature_c: MetricSummary,
    pub humidity_percent: MetricSummary,
    pub battery_percent: MetricSummary,
}
