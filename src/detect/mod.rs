//! Anomaly detection and incident grouping.

pub mod classifier;
pub mod history;
pub mod incident;
pub mod strategy;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SeverityThresholds;
use crate::reading::{ParseEnumError, PlotId, SensorType};

pub use classifier::AnomalyDetector;
pub use history::ReadingHistory;
pub use incident::{correlate, Incident, TrailingEvents};

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("invalid reading for plot {plot_id} ({sensor}): {reason}")]
    InvalidReading {
        plot_id: PlotId,
        sensor: SensorType,
        reason: String,
    },
    #[error("out-of-order reading for plot {plot_id} ({sensor}): {timestamp} is older than last recorded {last}")]
    OutOfOrderReading {
        plot_id: PlotId,
        sensor: SensorType,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
    #[error("insufficient baseline data: need {needed} samples, have {have}")]
    InsufficientBaseline { needed: usize, have: usize },
}

/// How a reading deviates from expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Drop,
    Spike,
    Drift,
    OutOfRange,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::Drop => "drop",
            AnomalyKind::Spike => "spike",
            AnomalyKind::Drift => "drift",
            AnomalyKind::OutOfRange => "out_of_range",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnomalyKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(AnomalyKind::Drop),
            "spike" => Ok(AnomalyKind::Spike),
            "drift" => Ok(AnomalyKind::Drift),
            "out_of_range" => Ok(AnomalyKind::OutOfRange),
            other => Err(ParseEnumError {
                what: "anomaly kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Which side of the expected value the reading fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" => Ok(Direction::Above),
            "below" => Ok(Direction::Below),
            other => Err(ParseEnumError {
                what: "direction",
                value: other.to_string(),
            }),
        }
    }
}

/// Severity tiers, ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Monotonic mapping from confidence to tier.
    pub fn from_confidence(confidence: f64, thresholds: &SeverityThresholds) -> Self {
        if confidence < thresholds.medium {
            Severity::Low
        } else if confidence < thresholds.high {
            Severity::Medium
        } else {
            Severity::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            other => Err(ParseEnumError {
                what: "severity",
                value: other.to_string(),
            }),
        }
    }
}

/// Rolling statistics at the moment a reading was scored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub stddev: f64,
    pub samples: usize,
}

/// Outcome of classifying one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectionResult {
    Normal,
    Anomalous(Detection),
}

impl DetectionResult {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, DetectionResult::Anomalous(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub kind: AnomalyKind,
    pub direction: Direction,
    pub severity: Severity,
    pub confidence: f64,
    pub z_score: Option<f64>,
}

/// A detected anomaly. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: uuid::Uuid,
    pub plot_id: PlotId,
    pub sensor_type: SensorType,
    pub timestamp: DateTime<Utc>,
    pub kind: AnomalyKind,
    pub direction: Direction,
    pub severity: Severity,
    pub confidence: f64,
    pub triggering_value: f64,
    pub baseline: Baseline,
    pub z_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping_is_monotonic() {
        let t = SeverityThresholds::default();
        let mut last = Severity::Low;
        for i in 0..=100 {
            let s = Severity::from_confidence(i as f64 / 100.0, &t);
            assert!(s >= last);
            last = s;
        }
        assert_eq!(Severity::from_confidence(0.49, &t), Severity::Low);
        assert_eq!(Severity::from_confidence(0.5, &t), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.85, &t), Severity::High);
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [AnomalyKind::Drop, AnomalyKind::Spike, AnomalyKind::Drift, AnomalyKind::OutOfRange] {
            assert_eq!(kind.as_str().parse::<AnomalyKind>().unwrap(), kind);
        }
    }
}
