//! Per-plot ingestion pipeline.
//!
//! A [`PlotPipeline`] owns every piece of state a plot needs across
//! readings: one [`ReadingHistory`] per sensor type and the trailing buffer
//! of recent anomaly events. Each call to [`PlotPipeline::ingest`] walks
//! `Idle -> Updated -> Classified -> [Correlated -> Recommended] -> Idle`.
//!
//! The reading is scored against the window as it stood before the reading
//! arrived, then recorded; both happen inside the same call and only after
//! validation, so a rejected reading leaves the plot untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::detect::{
    AnomalyDetector, AnomalyEvent, Baseline, DetectError, DetectionResult, Incident, ReadingHistory,
    TrailingEvents,
};
use crate::reading::{PlotId, Reading, SensorType};
use crate::recommend::{Recommendation, RecommendationEngine};

/// Everything produced by one ingested reading.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub reading: Reading,
    /// Statistics of the sensor's window after the reading was recorded.
    pub history: Baseline,
    pub detection: DetectionResult,
    pub event: Option<AnomalyEvent>,
    pub incident: Option<Incident>,
    pub recommendations: Vec<Recommendation>,
}

pub struct PlotPipeline {
    plot_id: PlotId,
    config: Arc<PipelineConfig>,
    detector: AnomalyDetector,
    engine: RecommendationEngine,
    histories: BTreeMap<SensorType, ReadingHistory>,
    trailing: TrailingEvents,
}

impl PlotPipeline {
    pub fn new(plot_id: PlotId, config: Arc<PipelineConfig>) -> Self {
        let detector = AnomalyDetector::from_config(&config);
        let trailing = TrailingEvents::new(config.correlation_window());
        Self {
            plot_id,
            config,
            detector,
            engine: RecommendationEngine::default(),
            histories: BTreeMap::new(),
            trailing,
        }
    }

    pub fn plot_id(&self) -> PlotId {
        self.plot_id
    }

    pub fn history(&self, sensor: SensorType) -> Option<&ReadingHistory> {
        self.histories.get(&sensor)
    }

    /// Events still eligible to join an incident.
    pub fn open_events(&self) -> usize {
        self.trailing.len()
    }

    pub fn ingest(&mut self, reading: Reading) -> Result<PipelineResult, DetectError> {
        self.ingest_at(reading, Utc::now())
    }

    /// Like [`ingest`](Self::ingest) with an explicit wall clock, used for the
    /// future-timestamp check.
    pub fn ingest_at(&mut self, reading: Reading, now: DateTime<Utc>) -> Result<PipelineResult, DetectError> {
        if let Err(e) = self.validate(&reading, now) {
            warn!(plot_id = reading.plot_id, sensor = %reading.sensor_type, error = %e, "rejected reading");
            return Err(e);
        }

        let sensor_cfg = self.config.sensor(reading.sensor_type);
        let history = self
            .histories
            .entry(reading.sensor_type)
            .or_insert_with(|| ReadingHistory::new(sensor_cfg.window_size));

        if let Err(e) = history.check_order(&reading) {
            warn!(plot_id = reading.plot_id, sensor = %reading.sensor_type, error = %e, "rejected reading");
            return Err(e);
        }

        let prior = history.baseline();
        let detection = self.detector.classify(history, &reading, sensor_cfg)?;
        history.record(reading.clone())?;
        let updated = history.baseline();

        let detected = match detection {
            DetectionResult::Anomalous(d) => d,
            DetectionResult::Normal => {
                debug!(plot_id = reading.plot_id, sensor = %reading.sensor_type, value = reading.value, "normal");
                return Ok(PipelineResult {
                    reading,
                    history: updated,
                    detection,
                    event: None,
                    incident: None,
                    recommendations: Vec::new(),
                });
            }
        };

        let event = AnomalyEvent {
            id: uuid::Uuid::new_v4(),
            plot_id: reading.plot_id,
            sensor_type: reading.sensor_type,
            timestamp: reading.timestamp,
            kind: detected.kind,
            direction: detected.direction,
            severity: detected.severity,
            confidence: detected.confidence,
            triggering_value: reading.value,
            baseline: prior,
            z_score: detected.z_score,
        };
        info!(
            plot_id = event.plot_id,
            sensor = %event.sensor_type,
            kind = %event.kind,
            severity = %event.severity,
            confidence = event.confidence,
            value = event.triggering_value,
            "anomaly detected"
        );

        let incident = self.trailing.push(event.clone());
        let recommendations = self.engine.recommend(&incident);
        debug!(
            incident = %incident.id,
            events = incident.events.len(),
            recommendations = recommendations.len(),
            "incident updated"
        );

        Ok(PipelineResult {
            reading,
            history: updated,
            detection,
            event: Some(event),
            incident: Some(incident),
            recommendations,
        })
    }

    fn validate(&self, reading: &Reading, now: DateTime<Utc>) -> Result<(), DetectError> {
        let invalid = |reason: String| DetectError::InvalidReading {
            plot_id: reading.plot_id,
            sensor: reading.sensor_type,
            reason,
        };

        if reading.plot_id != self.plot_id {
            return Err(invalid(format!("routed to the pipeline of plot {}", self.plot_id)));
        }
        if !reading.value.is_finite() {
            return Err(invalid(format!("value {} is not a finite number", reading.value)));
        }
        let (lo, hi) = reading.sensor_type.domain();
        if reading.value < lo || reading.value > hi {
            return Err(invalid(format!(
                "value {} outside the physical domain [{}, {}]",
                reading.value, lo, hi
            )));
        }
        if reading.timestamp > now + self.config.clock_skew() {
            return Err(invalid(format!("timestamp {} is in the future", reading.timestamp)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnomalyKind;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap()
    }

    fn pipeline() -> PlotPipeline {
        PlotPipeline::new(9, Arc::new(PipelineConfig::default()))
    }

    fn now() -> DateTime<Utc> {
        t0() + Duration::days(1)
    }

    #[test]
    fn test_rejects_other_plot_nan_and_future() {
        let mut p = pipeline();
        let wrong_plot = Reading::new(1, SensorType::Moisture, t0(), 50.0);
        assert!(matches!(p.ingest_at(wrong_plot, now()), Err(DetectError::InvalidReading { .. })));

        let nan = Reading::new(9, SensorType::Moisture, t0(), f64::NAN);
        assert!(matches!(p.ingest_at(nan, now()), Err(DetectError::InvalidReading { .. })));

        let impossible = Reading::new(9, SensorType::Humidity, t0(), 140.0);
        assert!(matches!(p.ingest_at(impossible, now()), Err(DetectError::InvalidReading { .. })));

        let future = Reading::new(9, SensorType::Moisture, now() + Duration::minutes(5), 50.0);
        assert!(matches!(p.ingest_at(future, now()), Err(DetectError::InvalidReading { .. })));

        assert!(p.history(SensorType::Moisture).map_or(true, |h| h.is_empty()));
    }

    #[test]
    fn test_out_of_order_not_merged() {
        let mut p = pipeline();
        p.ingest_at(Reading::new(9, SensorType::Moisture, t0() + Duration::minutes(10), 50.0), now())
            .unwrap();
        let err = p
            .ingest_at(Reading::new(9, SensorType::Moisture, t0(), 51.0), now())
            .unwrap_err();
        assert!(matches!(err, DetectError::OutOfOrderReading { .. }));
        assert_eq!(p.history(SensorType::Moisture).unwrap().len(), 1);

        // Other sensors keep their own ordering.
        p.ingest_at(Reading::new(9, SensorType::Temperature, t0(), 20.0), now())
            .unwrap();
    }

    #[test]
    fn test_drop_produces_event_incident_and_advice() {
        let mut p = pipeline();
        for i in 0..20 {
            let v = 60.0 + [0.5, -0.5, 0.3, -0.2][i % 4];
            let r = p
                .ingest_at(Reading::new(9, SensorType::Moisture, t0() + Duration::minutes(i as i64), v), now())
                .unwrap();
            assert!(r.event.is_none());
        }
        let r = p
            .ingest_at(Reading::new(9, SensorType::Moisture, t0() + Duration::minutes(20), 30.0), now())
            .unwrap();
        let event = r.event.unwrap();
        assert_eq!(event.kind, AnomalyKind::Drop);
        assert_eq!(event.baseline.samples, 20);
        assert_eq!(r.history.samples, 21);
        let incident = r.incident.unwrap();
        assert_eq!(incident.events.len(), 1);
        assert!(r.recommendations.iter().any(|rec| rec.rule == "irrigation_check"));
        assert_eq!(p.open_events(), 1);
    }
}
