//! Reading normalizer: raw gateway payload in, canonical [`Reading`] out.
//!
//! Two wire shapes exist in the field. The newer gateway firmware sends
//! metric units under Spanish field names (`nivel_m`, `caudal_l_s`, ...),
//! older firmware sends the original names (`water_level_cm`, ...). The
//! shape is picked once, from field presence, and decoded into its own
//! struct; everything after that works on the canonical record.
//!
//! No side effects.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::models::{Reading, Signal, SignalQuality, WireFormat};

// ---

/// Numeric timestamps above this are milliseconds, at or below it seconds.
pub const MILLIS_THRESHOLD: f64 = 10_000_000_000.0;

/// Latest accepted instant, 9999-12-31T23:59:59.999Z, in epoch milliseconds.
pub const LATEST_TIMESTAMP_MS: i64 = 253_402_300_799_999;

/// Field presence that marks the gateway wire shape.
const GATEWAY_MARKERS: [&str; 2] = ["temperatura_c", "humedad_pct"];

const DEFAULT_TEMPERATURE_C: f64 = 20.0;
const DEFAULT_HUMIDITY_PERCENT: f64 = 50.0;
const DEFAULT_BATTERY_PERCENT: f64 = 100.0;

/// Inclusive valid range for one numeric payload field.
#[derive(Debug, Clone, Copy)]
pub struct FieldRange {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
}

impl FieldRange {
    const fn new(field: &'static str, min: f64, max: f64) -> Self {
        Self { field, min, max }
    }
}

/// Valid ranges for every numeric field of both wire shapes.
pub const FIELD_RANGES: [FieldRange; 11] = [
    // gateway shape
    FieldRange::new("temperatura_c", -50.0, 60.0),
    FieldRange::new("humedad_pct", 0.0, 100.0),
    FieldRange::new("caudal_l_s", 0.0, 10_000.0),
    FieldRange::new("lluvia_mm", 0.0, 10_000.0),
    FieldRange::new("nivel_m", -10.0, 100.0),
    // legacy shape
    FieldRange::new("water_level_cm", 0.0, 500.0),
    FieldRange::new("rain_accumulated_mm", 0.0, 10_000.0),
    FieldRange::new("flow_rate_lmin", 0.0, 10_000.0),
    FieldRange::new("temperature_c", -50.0, 60.0),
    FieldRange::new("humidity_percent", 0.0, 100.0),
    FieldRange::new("battery_percent", 0.0, 100.0),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Number(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    sensor_id: Option<String>,
    gateway_id: Option<String>,
    timestamp: RawTimestamp,
    temperatura_c: Option<f64>,
    humedad_pct: Option<f64>,
    caudal_l_s: Option<f64>,
    lluvia_mm: Option<f64>,
    nivel_m: Option<f64>,
    battery_percent: Option<f64>,
    seq: Option<i64>,
    rssi: Option<f64>,
    snr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LegacyPayload {
    sensor_id: Option<String>,
    gateway_id: Option<String>,
    timestamp: RawTimestamp,
    water_level_cm: Option<f64>,
    rain_accumulated_mm: Option<f64>,
    flow_rate_lmin: Option<f64>,
    temperature_c: Option<f64>,
    humidity_percent: Option<f64>,
    battery_percent: Option<f64>,
    rssi: Option<f64>,
    snr: Option<f64>,
}

/// A payload decoded into exactly one of the known wire shapes.
#[derive(Debug)]
enum WirePayload {
    Gateway(GatewayPayload),
    Legacy(LegacyPayload),
}

impl WirePayload {
    fn decode(payload: &Value, map: &Map<String, Value>) -> Result<Self, ValidationError> {
        // ---
        if GATEWAY_MARKERS.iter().any(|key| map.contains_key(*key)) {
            decode_as::<GatewayPayload>(payload).map(WirePayload::Gateway)
        } else {
            decode_as::<LegacyPayload>(payload).map(WirePayload::Legacy)
        }
    }

    fn into_reading(self) -> Result<Reading, ValidationError> {
        // ---
        match self {
            WirePayload::Gateway(p) => Ok(Reading {
                sensor_id: required_id(p.sensor_id)?,
                gateway_id: optional_id(p.gateway_id),
                timestamp: canonical_timestamp(&p.timestamp)?,
                water_level_cm: p.nivel_m.unwrap_or(0.0) * 100.0,
                rain_accumulated_mm: p.lluvia_mm.unwrap_or(0.0),
                flow_rate_lmin: p.caudal_l_s.unwrap_or(0.0) * 60.0,
                temperature_c: p.temperatura_c.unwrap_or(DEFAULT_TEMPERATURE_C),
                humidity_percent: p.humedad_pct.unwrap_or(DEFAULT_HUMIDITY_PERCENT),
                battery_percent: p.battery_percent.unwrap_or(DEFAULT_BATTERY_PERCENT),
                signal: signal(p.rssi, p.snr),
                seq: p.seq,
                format: WireFormat::Gateway,
            }),
            WirePayload::Legacy(p) => Ok(Reading {
                sensor_id: required_id(p.sensor_id)?,
                gateway_id: optional_id(p.gateway_id),
                timestamp: canonical_timestamp(&p.timestamp)?,
                water_level_cm: p.water_level_cm.unwrap_or(0.0),
                rain_accumulated_mm: p.rain_accumulated_mm.unwrap_or(0.0),
                flow_rate_lmin: p.flow_rate_lmin.unwrap_or(0.0),
                temperature_c: p.temperature_c.unwrap_or(DEFAULT_TEMPERATURE_C),
                humidity_percent: p.humidity_percent.unwrap_or(DEFAULT_HUMIDITY_PERCENT),
                battery_percent: p.battery_percent.unwrap_or(DEFAULT_BATTERY_PERCENT),
                signal: signal(p.rssi, p.snr),
                seq: None,
                format: WireFormat::Legacy,
            }),
        }
    }
}

// ---

/// Validate and normalize an inbound payload.
///
/// Checks, in order: the payload is an object, `timestamp` is present, every
/// numeric field present lies inside its [`FIELD_RANGES`] entry, the chosen
/// wire shape decodes, and `sensor_id` is non-empty. The first failure wins.
pub fn normalize(payload: &Value) -> Result<Reading, ValidationError> {
    // ---
    let map = payload
        .as_object()
        .ok_or_else(|| ValidationError::new("payload", "must be a JSON object"))?;

    if map.get("timestamp").map_or(true, Value::is_null) {
        return Err(ValidationError::new("timestamp", "missing required field"));
    }

    check_ranges(map)?;

    WirePayload::decode(payload, map)?.into_reading()
}

fn check_ranges(map: &Map<String, Value>) -> Result<(), ValidationError> {
    // ---
    for range in FIELD_RANGES.iter() {
        let Some(raw) = map.get(range.field) else {
            continue;
        };
        if raw.is_null() {
            continue;
        }
        let value = raw
            .as_f64()
            .ok_or_else(|| ValidationError::new(range.field, "must be a number"))?;
        if !value.is_finite() || value < range.min || value > range.max {
            return Err(ValidationError::new(
                range.field,
                format!("must be between {} and {}", range.min, range.max),
            ));
        }
    }
    Ok(())
}

fn decode_as<T: DeserializeOwned>(payload: &Value) -> Result<T, ValidationError> {
    // ---
    serde_path_to_error::deserialize(payload).map_err(|err| {
        let field = err.path().to_string();
        let field = if field.is_empty() || field == "." {
            "payload".to_string()
        } else {
            field
        };
        ValidationError::new(field, err.into_inner().to_string())
    })
}

/// Convert a raw timestamp to a canonical UTC instant.
///
/// Strings are parsed as RFC 3339, or as an epoch number when they hold one.
/// Numbers above [`MILLIS_THRESHOLD`] are read as milliseconds, everything
/// else as seconds.
fn canonical_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>, ValidationError> {
    // ---
    match raw {
        RawTimestamp::Number(n) => from_epoch_number(*n),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Ok(parsed.with_timezone(&Utc));
            }
            match text.parse::<f64>() {
                Ok(n) => from_epoch_number(n),
                Err(_) => Err(ValidationError::new(
                    "timestamp",
                    format!("unparseable date '{text}'"),
                )),
            }
        }
    }
}

fn from_epoch_number(n: f64) -> Result<DateTime<Utc>, ValidationError> {
    // ---
    if !n.is_finite() || n <= 0.0 {
        return Err(ValidationError::new(
            "timestamp",
            "must be a positive epoch value",
        ));
    }
    let millis = if n > MILLIS_THRESHOLD { n } else { n * 1000.0 };
    let millis = millis.round();
    if millis > LATEST_TIMESTAMP_MS as f64 {
        return Err(ValidationError::new("timestamp", "later than year 9999"));
    }
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| ValidationError::new("timestamp", "out of representable range"))
}

fn signal(rssi: Option<f64>, snr: Option<f64>) -> Option<Signal> {
    if rssi.is_none() && snr.is_none() {
        return None;
    }
    Some(Signal {
        rssi,
        snr,
        quality: rssi.map(SignalQuality::from_rssi),
    })
}

fn required_id(id: Option<String>) -> Result<String, ValidationError> {
    match id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(ValidationError::new("sensor_id", "missing required field")),
    }
}

fn optional_id(id: Option<String>) -> Option<String> {
    id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
