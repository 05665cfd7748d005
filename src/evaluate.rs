//! Detection quality against labelled data.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::pipeline::PlotPipeline;
use crate::reading::{PlotId, Reading};
use crate::simulate::LabelledReading;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub false_positive_rate: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_negatives: u64,
    pub total_predictions: u64,
    pub total_actual_anomalies: u64,
    pub total_normal_readings: u64,
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<22} {:.4}", "Precision", self.precision)?;
        writeln!(f, "{:<22} {:.4}", "Recall", self.recall)?;
        writeln!(f, "{:<22} {:.4}", "F1 score", self.f1_score)?;
        writeln!(f, "{:<22} {:.4}", "False positive rate", self.false_positive_rate)?;
        writeln!(
            f,
            "{:<22} tp={} fp={} fn={} tn={}",
            "Confusion matrix", self.true_positives, self.false_positives, self.false_negatives, self.true_negatives
        )?;
        write!(
            f,
            "{:<22} {} ({} anomalous, {} normal)",
            "Readings", self.total_predictions, self.total_actual_anomalies, self.total_normal_readings
        )
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Collects (predicted, actual) outcomes per reading key. Recording the same
/// key twice keeps the later outcome.
#[derive(Debug, Default, Clone)]
pub struct Evaluator {
    outcomes: BTreeMap<String, (bool, bool)>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, predicted: bool, actual: bool) {
        self.outcomes.insert(key.into(), (predicted, actual));
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn reset(&mut self) {
        self.outcomes.clear();
    }

    pub fn metrics(&self) -> EvaluationMetrics {
        let (mut tp, mut fp, mut fn_, mut tn) = (0u64, 0u64, 0u64, 0u64);
        for &(predicted, actual) in self.outcomes.values() {
            match (predicted, actual) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => tn += 1,
            }
        }

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        EvaluationMetrics {
            precision,
            recall,
            f1_score,
            false_positive_rate: ratio(fp, fp + tn),
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            true_negatives: tn,
            total_predictions: tp + fp + fn_ + tn,
            total_actual_anomalies: tp + fn_,
            total_normal_readings: fp + tn,
        }
    }
}

pub fn reading_key(reading: &Reading) -> String {
    format!(
        "{}/{}/{}",
        reading.plot_id,
        reading.sensor_type,
        reading.timestamp.timestamp_millis()
    )
}

/// Run labelled readings through fresh per-plot pipelines and score the
/// detections. Rejected readings are left out of the metrics.
pub fn evaluate_labelled(config: Arc<PipelineConfig>, readings: &[LabelledReading], now: DateTime<Utc>) -> EvaluationMetrics {
    let mut pipelines: BTreeMap<PlotId, PlotPipeline> = BTreeMap::new();
    let mut evaluator = Evaluator::new();

    for lr in readings {
        let plot_id = lr.reading.plot_id;
        let pipeline = pipelines
            .entry(plot_id)
            .or_insert_with(|| PlotPipeline::new(plot_id, config.clone()));
        match pipeline.ingest_at(lr.reading.clone(), now) {
            Ok(result) => evaluator.record(reading_key(&lr.reading), result.event.is_some(), lr.is_anomaly()),
            Err(e) => debug!(error = %e, "reading left out of evaluation"),
        }
    }

    evaluator.metrics()
}
