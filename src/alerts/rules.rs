//! Threshold and trend rules.
//!
//! [`evaluate`] is a pure function of the reading, the sensor's configuration
//! and its recent history. Suppression and persistence happen later, in the
//! dispatcher.

use super::trend::{self, TrendAnalysis};
use crate::models::{AlertKind, Reading, SensorConfig, Severity, StoredReading};

/// Minimum mean rise per reading (cm) for the high-and-rising warning.
const RISING_WATER_MIN_CHANGE: f64 = 2.0;

/// Flow this far above its threshold alerts even without a rising trend.
const FLOW_SURGE_FACTOR: f64 = 1.2;

// ---

/// An alert the rules want raised, before suppression.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Rules for one reading. `history` is newest first, as the store returns it.
///
/// A missing or disabled configuration yields nothing. Each rule needs its
/// own threshold; an unset threshold turns that rule off.
pub fn evaluate(
    reading: &Reading,
    config: Option<&SensorConfig>,
    history: &[StoredReading],
) -> Vec<AlertCandidate> {
    // ---
    let Some(config) = config.filter(|c| c.enabled) else {
        return Vec::new();
    };
    let thresholds = &config.thresholds;

    let mut candidates = Vec::new();
    candidates.extend(water_level(
        reading.water_level_cm,
        thresholds.water_level_critical_cm,
        thresholds.water_level_warning_cm,
        || series(history, |r| r.water_level_cm),
    ));
    candidates.extend(rainfall(
        reading.rain_accumulated_mm,
        thresholds.rainfall_heavy_mm,
    ));
    candidates.extend(flow(
        reading.flow_rate_lmin,
        thresholds.flow_excessive_lmin,
        || series(history, |r| r.flow_rate_lmin),
    ));
    candidates
}

/// Trend of one metric across `history`, oldest to newest.
fn series(history: &[StoredReading], metric: impl Fn(&Reading) -> f64) -> TrendAnalysis {
    let values: Vec<f64> = history.iter().rev().map(|r| metric(&r.reading)).collect();
    trend::analyze(&values)
}

fn water_level(
    level: f64,
    critical: Option<f64>,
    warning: Option<f64>,
    trend: impl FnOnce() -> TrendAnalysis,
) -> Option<AlertCandidate> {
    // ---
    if let Some(critical) = critical {
        if level > critical {
            return Some(AlertCandidate {
                kind: AlertKind::WaterLevelCritical,
                severity: Severity::Critical,
                value: level,
                threshold: critical,
                message: format!("Critical water level: {level}cm (threshold: {critical}cm)"),
            });
        }
    }

    let warning = warning?;
    if level <= warning {
        return None;
    }
    let trend = trend();
    if !(trend.is_increasing() && trend.avg_change > RISING_WATER_MIN_CHANGE) {
        return None;
    }
    Some(AlertCandidate {
        kind: AlertKind::WaterLevelHighTrend,
        severity: Severity::Warning,
        value: level,
        threshold: warning,
        message: format!(
            "Water level HIGH and RISING: {level}cm (trend: +{:.1}cm/reading)",
            trend.avg_change
        ),
    })
}

fn rainfall(rain: f64, heavy: Option<f64>) -> Option<AlertCandidate> {
    // ---
    let heavy = heavy.filter(|&t| rain > t)?;
    Some(AlertCandidate {
        kind: AlertKind::RainfallHeavy,
        severity: Severity::Warning,
        value: rain,
        threshold: heavy,
        message: format!("Heavy rainfall: {rain}mm (threshold: {heavy}mm)"),
    })
}

fn flow(
    rate: f64,
    excessive: Option<f64>,
    trend: impl FnOnce() -> TrendAnalysis,
) -> Option<AlertCandidate> {
    // ---
    let excessive = excessive.filter(|&t| rate > t)?;
    if !(rate > excessive * FLOW_SURGE_FACTOR || trend().is_increasing()) {
        return None;
    }
    Some(AlertCandidate {
        kind: AlertKind::FlowExcessive,
        severity: Severity::Warning,
        value: rate,
        threshold: excessive,
        message: format!("Excessive flow: {rate}L/min (threshold: {excessive}L/min)"),
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    // ---
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::models::{Reading, SensorConfig, StoredReading, Thresholds, WireFormat};

    pub fn reading(sensor_id: &str, water_level_cm: f64) -> Reading {
        Reading {
            sensor_id: sensor_id.into(),
            gateway_id: None,
            timestamp: Utc::now(),
            water_level_cm,
            rain_accumulated_mm: 0.0,
            flow_rate_lmin: 0.0,
            temperature_c: 20.0,
            humidity_percent: 50.0,
            battery_percent: 100.0,
            signal: None,
            seq: None,
            format: WireFormat::Legacy,
        }
    }

    pub fn config(sensor_id: &str) -> SensorConfig {
        SensorConfig {
            sensor_id: sensor_id.into(),
            name: Some("Rio Test".into()),
            enabled: true,
            thresholds: Thresholds {
                water_level_critical_cm: Some(450.0),
                water_level_warning_cm: Some(350.0),
                rainfall_heavy_mm: Some(50.0),
                flow_excessive_lmin: Some(1000.0),
            },
            location: None,
        }
    }

    /// History newest first, one reading a minute apart.
    pub fn history(sensor_id: &str, oldest_to_newest: &[Reading]) -> Vec<StoredReading> {
        let now = Utc::now();
        let n = oldest_to_newest.len() as i64;
        oldest_to_newest
            .iter()
            .enumerate()
            .rev()
            .map(|(i, r)| {
                let at = now - Duration::minutes(n - i as i64);
                StoredReading {
                    id: Uuid::new_v4(),
                    received_at: at,
                    reading: Reading {
                        sensor_id: sensor_id.into(),
                        timestamp: at,
                        ..r.clone()
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::fixtures::*;
    use super::*;

    fn levels(values: &[f64]) -> Vec<StoredReading> {
        let rs: Vec<Reading> = values.iter().map(|&v| reading("S1", v)).collect();
        history("S1", &rs)
    }

    #[test]
    fn test_critical_water_level() {
        // ---
        let out = evaluate(&reading("S1", 480.0), Some(&config("S1")), &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, AlertKind::WaterLevelCritical);
        assert_eq!(out[0].severity, Severity::Critical);
        assert_eq!(out[0].value, 480.0);
        assert_eq!(out[0].threshold, 450.0);
        assert_eq!(out[0].message, "Critical water level: 480cm (threshold: 450cm)");
    }

    #[test]
    fn test_high_and_rising_needs_a_steep_trend() {
        // ---
        let cfg = config("S1");
        let steep = levels(&[390.0, 394.0, 398.0, 402.0]);
        let out = evaluate(&reading("S1", 402.0), Some(&cfg), &steep);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, AlertKind::WaterLevelHighTrend);
        assert_eq!(out[0].threshold, 350.0);
        assert!(out[0].message.contains("+4.0cm/reading"), "{}", out[0].message);

        let gentle = levels(&[400.0, 401.0, 402.0]);
        assert!(evaluate(&reading("S1", 402.0), Some(&cfg), &gentle).is_empty());

        // a single reading has no trend
        let single = levels(&[402.0]);
        assert!(evaluate(&reading("S1", 402.0), Some(&cfg), &single).is_empty());
    }

    #[test]
    fn test_history_is_read_oldest_first() {
        // ---
        // falling water: newest first would look like a rise
        let falling = levels(&[420.0, 410.0, 400.0]);
        assert!(evaluate(&reading("S1", 400.0), Some(&config("S1")), &falling).is_empty());
    }

    #[test]
    fn test_rainfall_heavy() {
        // ---
        let mut r = reading("S1", 10.0);
        r.rain_accumulated_mm = 50.0;
        assert!(evaluate(&r, Some(&config("S1")), &[]).is_empty());

        r.rain_accumulated_mm = 62.5;
        let out = evaluate(&r, Some(&config("S1")), &[]);
        assert_eq!(out[0].kind, AlertKind::RainfallHeavy);
        assert_eq!(out[0].message, "Heavy rainfall: 62.5mm (threshold: 50mm)");
    }

    #[test]
    fn test_flow_needs_surge_or_rising_trend() {
        // ---
        let cfg = config("S1");
        let mut r = reading("S1", 10.0);

        r.flow_rate_lmin = 1100.0;
        assert!(evaluate(&r, Some(&cfg), &[]).is_empty());

        r.flow_rate_lmin = 1250.0;
        let out = evaluate(&r, Some(&cfg), &[]);
        assert_eq!(out[0].kind, AlertKind::FlowExcessive);

        let rising: Vec<Reading> = [900.0, 1000.0, 1100.0]
            .iter()
            .map(|&f| Reading {
                flow_rate_lmin: f,
                ..reading("S1", 10.0)
            })
            .collect();
        r.flow_rate_lmin = 1100.0;
        let out = evaluate(&r, Some(&cfg), &history("S1", &rising));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::Warning);
    }

    #[test]
    fn test_one_reading_can_raise_several() {
        // ---
        let mut r = reading("S1", 500.0);
        r.rain_accumulated_mm = 80.0;
        r.flow_rate_lmin = 5000.0;
        let kinds: Vec<AlertKind> = evaluate(&r, Some(&config("S1")), &[])
            .into_iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::WaterLevelCritical,
                AlertKind::RainfallHeavy,
                AlertKind::FlowExcessive
            ]
        );
    }

    #[test]
    fn test_disabled_or_unknown_sensor_is_silent() {
        // ---
        let mut r = reading("S1", 9_999.0);
        r.rain_accumulated_mm = 9_999.0;
        r.flow_rate_lmin = 9_999.0;

        let mut cfg = config("S1");
        cfg.enabled = false;
        assert!(evaluate(&r, Some(&cfg), &[]).is_empty());
        assert!(evaluate(&r, None, &[]).is_empty());
    }

    #[test]
    fn test_unset_threshold_disables_rule() {
        // ---
        let mut cfg = config("S1");
        cfg.thresholds.water_level_critical_cm = None;
        cfg.thresholds.water_level_warning_cm = None;
        assert!(evaluate(&reading("S1", 480.0), Some(&cfg), &[]).is_empty());
    }
}
