//! Short-window trend classification over an ordered series.

use serde::Serialize;

/// Mean step change above which a series counts as rising (and below the
/// negation of which it counts as falling).
const DIRECTION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// Mean of the per-step deltas.
    pub avg_change: f64,
    /// Population standard deviation of the per-step deltas.
    pub volatility: f64,
}

impl TrendAnalysis {
    const FLAT: TrendAnalysis = TrendAnalysis {
        direction: TrendDirection::Stable,
        avg_change: 0.0,
        volatility: 0.0,
    };

    pub fn is_increasing(&self) -> bool {
        self.direction == TrendDirection::Increasing
    }
}

/// Analyze `values`, ordered oldest to newest.
pub fn analyze(values: &[f64]) -> TrendAnalysis {
    // ---
    if values.len() < 2 {
        return TrendAnalysis::FLAT;
    }

    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let n = deltas.len() as f64;
    let avg_change = deltas.iter().sum::<f64>() / n;
    let variance = deltas.iter().map(|d| (d - avg_change).powi(2)).sum::<f64>() / n;

    let direction = if avg_change > DIRECTION_THRESHOLD {
        TrendDirection::Increasing
    } else if avg_change < -DIRECTION_THRESHOLD {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    TrendAnalysis {
        direction,
        avg_change,
        volatility: variance.sqrt(),
    }
}
