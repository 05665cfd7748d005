//! Scoring strategies selectable per sensor type.
//!
//! Every strategy answers the same question: given the retained window and a
//! candidate value, is the value anomalous, and if so of which kind and with
//! what confidence. `Ok(None)` means "looks normal";
//! `Err(InsufficientBaseline)` means the window is too short to judge.

use serde::{Deserialize, Serialize};

use crate::config::SensorConfig;
use crate::detect::history::ReadingHistory;
use crate::detect::{AnomalyKind, DetectError, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Fixed `[min, max]` range. No history needed.
    Threshold,
    /// Rolling z-score with a hard `z_max` cut-off.
    #[default]
    Zscore,
    /// Rolling z-score mapped onto a continuous [0, 1] outlier score.
    Outlier,
}

/// Raw result of a strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub kind: AnomalyKind,
    pub direction: Direction,
    /// Strategy-specific magnitude: |z| for statistical strategies, distance
    /// beyond the violated bound for the threshold strategy.
    pub raw: f64,
    pub confidence: f64,
    pub z_score: Option<f64>,
}

impl Strategy {
    pub fn score(
        self,
        history: &ReadingHistory,
        value: f64,
        cfg: &SensorConfig,
        stddev_floor: f64,
    ) -> Result<Option<Score>, DetectError> {
        match self {
            Strategy::Threshold => Ok(threshold(value, cfg)),
            Strategy::Zscore => {
                let z = z_score(history, value, cfg, stddev_floor)?;
                let flagged = if z.abs() >= cfg.z_max {
                    Some(statistical(history, z, (z.abs() / cfg.z_saturation()).min(1.0), cfg, stddev_floor))
                } else {
                    None
                };
                Ok(merge(flagged, range_score(history, value, cfg, stddev_floor)))
            }
            Strategy::Outlier => {
                let z = z_score(history, value, cfg, stddev_floor)?;
                let score = (z.abs() / cfg.z_max).min(1.0);
                let flagged = if score >= cfg.outlier_min_score {
                    Some(statistical(history, z, score, cfg, stddev_floor))
                } else {
                    None
                };
                Ok(merge(flagged, range_score(history, value, cfg, stddev_floor)))
            }
        }
    }
}

/// Value outside `[min, max]`. Confidence grows with the excess relative to
/// the width of the range, starting at 0.5 right at the bound.
pub fn threshold(value: f64, cfg: &SensorConfig) -> Option<Score> {
    let (excess, direction) = if value < cfg.min {
        (cfg.min - value, Direction::Below)
    } else if value > cfg.max {
        (value - cfg.max, Direction::Above)
    } else {
        return None;
    };
    let width = cfg.max - cfg.min;
    Some(Score {
        kind: AnomalyKind::OutOfRange,
        direction,
        raw: excess,
        confidence: (0.5 + excess / width).min(1.0),
        z_score: None,
    })
}

/// z of `value` against the retained window, with the stddev floored.
pub fn z_score(
    history: &ReadingHistory,
    value: f64,
    cfg: &SensorConfig,
    stddev_floor: f64,
) -> Result<f64, DetectError> {
    history.require(cfg.min_history_fill)?;
    let sd = history.stddev().max(stddev_floor);
    Ok((value - history.mean()) / sd)
}

fn statistical(
    history: &ReadingHistory,
    z: f64,
    confidence: f64,
    cfg: &SensorConfig,
    stddev_floor: f64,
) -> Score {
    let direction = if z >= 0.0 { Direction::Above } else { Direction::Below };
    let kind = if is_sustained(history, z, cfg, stddev_floor) {
        AnomalyKind::Drift
    } else if z >= 0.0 {
        AnomalyKind::Spike
    } else {
        AnomalyKind::Drop
    };
    Score {
        kind,
        direction,
        raw: z.abs(),
        confidence,
        z_score: Some(z),
    }
}

/// True when the last `drift_run` retained readings already sat on the same
/// side of the mean as `z`, each at least `drift_z` deviations out. A value
/// reached by such a run is a drift; one reached in a single jump is a
/// spike or drop.
fn is_sustained(history: &ReadingHistory, z: f64, cfg: &SensorConfig, stddev_floor: f64) -> bool {
    if history.len() < cfg.drift_run {
        return false;
    }
    let mean = history.mean();
    let sd = history.stddev().max(stddev_floor);
    history.window().iter().rev().take(cfg.drift_run).all(|r| {
        let zi = (r.value - mean) / sd;
        zi.signum() == z.signum() && zi.abs() >= cfg.drift_z
    })
}

/// Range check for the statistical strategies. An out-of-range value that
/// follows `drift_run` readings already beyond the same bound, each at least
/// `drift_z` deviations out, is reported as a drift.
fn range_score(history: &ReadingHistory, value: f64, cfg: &SensorConfig, stddev_floor: f64) -> Option<Score> {
    let mut score = threshold(value, cfg)?;
    let direction = score.direction;
    let side = match direction {
        Direction::Above => 1.0,
        Direction::Below => -1.0,
    };
    let run_beyond = history.window().iter().rev().take(cfg.drift_run).all(|r| match direction {
        Direction::Above => r.value > cfg.max,
        Direction::Below => r.value < cfg.min,
    });
    if run_beyond && is_sustained(history, side, cfg, stddev_floor) {
        score.kind = AnomalyKind::Drift;
    }
    Some(score)
}

// A statistical flag keeps its kind; the range check can only raise its
// confidence. Without a statistical flag the range check stands alone.
fn merge(flagged: Option<Score>, range: Option<Score>) -> Option<Score> {
    match (flagged, range) {
        (Some(mut s), Some(r)) => {
            s.confidence = s.confidence.max(r.confidence);
            Some(s)
        }
        (Some(s), None) => Some(s),
        (None, r) => r,
    }
}
