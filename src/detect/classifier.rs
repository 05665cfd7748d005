use tracing::trace;

use crate::config::{PipelineConfig, SensorConfig, SeverityThresholds};
use crate::detect::history::ReadingHistory;
use crate::detect::{DetectError, Detection, DetectionResult, Severity};
use crate::reading::Reading;

/// Classifies readings against a history using the sensor's configured strategy.
///
/// Holds no per-reading state: the same history, reading and config always
/// produce the same result.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    severity: SeverityThresholds,
    stddev_floor: f64,
}

impl AnomalyDetector {
    pub fn new(severity: SeverityThresholds, stddev_floor: f64) -> Self {
        Self {
            severity,
            stddev_floor,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.severity, config.stddev_floor)
    }

    pub fn classify(
        &self,
        history: &ReadingHistory,
        reading: &Reading,
        sensor: &SensorConfig,
    ) -> Result<DetectionResult, DetectError> {
        if !reading.value.is_finite() {
            return Err(DetectError::InvalidReading {
                plot_id: reading.plot_id,
                sensor: reading.sensor_type,
                reason: format!("value {} is not a finite number", reading.value),
            });
        }

        match sensor.strategy.score(history, reading.value, sensor, self.stddev_floor) {
            Ok(Some(score)) => Ok(DetectionResult::Anomalous(Detection {
                kind: score.kind,
                direction: score.direction,
                severity: Severity::from_confidence(score.confidence, &self.severity),
                confidence: score.confidence,
                z_score: score.z_score,
            })),
            Ok(None) => Ok(DetectionResult::Normal),
            Err(DetectError::InsufficientBaseline { needed, have }) => {
                trace!(
                    plot_id = reading.plot_id,
                    sensor = %reading.sensor_type,
                    needed,
                    have,
                    "insufficient history, treating reading as normal"
                );
                Ok(DetectionResult::Normal)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::strategy::Strategy;
    use crate::detect::AnomalyKind;
    use crate::reading::SensorType;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::minutes(i)
    }

    fn moisture(i: i64, value: f64) -> Reading {
        Reading::new(3, SensorType::Moisture, t(i), value)
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::from_config(&PipelineConfig::default())
    }

    fn noisy_history(center: f64, n: i64) -> ReadingHistory {
        let mut h = ReadingHistory::new(100);
        for i in 0..n {
            let jitter = [0.0, 0.8, -0.6, 1.1, -1.0, 0.4, -0.3][(i % 7) as usize];
            h.record(moisture(i, center + jitter)).unwrap();
        }
        h
    }

    #[test]
    fn test_nan_is_invalid() {
        let h = noisy_history(60.0, 10);
        let cfg = SensorConfig::with_bounds(35.0, 85.0);
        let err = detector().classify(&h, &moisture(20, f64::NAN), &cfg).unwrap_err();
        assert!(matches!(err, DetectError::InvalidReading { .. }));
    }

    #[test]
    fn test_cold_start_is_normal() {
        let h = noisy_history(60.0, 3);
        let cfg = SensorConfig::with_bounds(35.0, 85.0);
        let r = detector().classify(&h, &moisture(5, 5.0), &cfg).unwrap();
        assert_eq!(r, DetectionResult::Normal);
    }

    #[test]
    fn test_in_range_low_z_is_normal() {
        let h = noisy_history(60.0, 30);
        let cfg = SensorConfig::with_bounds(35.0, 85.0);
        let sd = h.stddev();
        for step in 0..30 {
            let z = -2.9 + step as f64 * 0.2;
            let r = detector()
                .classify(&h, &moisture(40, h.mean() + z * sd), &cfg)
                .unwrap();
            assert_eq!(r, DetectionResult::Normal, "z={}", z);
        }
    }

    #[test]
    fn test_rapid_moisture_drop() {
        let h = noisy_history(40.0, 30);
        let mut cfg = SensorConfig::with_bounds(5.0, 85.0);
        cfg.z_max = 3.0;
        let r = detector().classify(&h, &moisture(40, 10.0), &cfg).unwrap();
        match r {
            DetectionResult::Anomalous(d) => {
                assert_eq!(d.kind, AnomalyKind::Drop);
                assert!(d.z_score.unwrap() < -3.0);
            }
            other => panic!("expected anomaly, got {:?}", other),
        }
    }

    #[test]
    fn test_confidence_and_severity_monotonic_in_z() {
        let h = noisy_history(50.0, 40);
        let sd = h.stddev();
        for strategy in [Strategy::Zscore, Strategy::Outlier] {
            let mut cfg = SensorConfig::with_bounds(0.0, 100.0);
            cfg.strategy = strategy;
            let mut last_conf = 0.0;
            let mut last_sev = Severity::Low;
            for step in 0..80 {
                let z = step as f64 * 0.1;
                let r = detector().classify(&h, &moisture(60, h.mean() + z * sd), &cfg).unwrap();
                let (conf, sev) = match r {
                    DetectionResult::Anomalous(d) => (d.confidence, d.severity),
                    DetectionResult::Normal => (0.0, Severity::Low),
                };
                assert!(conf >= last_conf, "{:?} confidence fell at z={}", strategy, z);
                assert!(sev >= last_sev, "{:?} severity fell at z={}", strategy, z);
                last_conf = conf;
                last_sev = sev;
            }
        }
    }

    #[test]
    fn test_classify_is_idempotent() {
        let h = noisy_history(60.0, 30);
        let cfg = SensorConfig::with_bounds(35.0, 85.0);
        let r = moisture(40, 20.0);
        let a = detector().classify(&h, &r, &cfg).unwrap();
        let b = detector().classify(&h, &r, &cfg).unwrap();
        assert_eq!(a, b);
    }
}
