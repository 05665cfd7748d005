//! End-to-end field scenarios through the per-plot pipeline.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use cropsentinel::config::PipelineConfig;
use cropsentinel::detect::{AnomalyKind, DetectError};
use cropsentinel::pipeline::{PipelineResult, PlotPipeline};
use cropsentinel::reading::{PlotId, Reading, SensorType};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 14, 9, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    t0() + Duration::days(2)
}

struct Field {
    pipeline: PlotPipeline,
}

impl Field {
    fn new(plot: PlotId) -> Self {
        Self {
            pipeline: PlotPipeline::new(plot, Arc::new(PipelineConfig::default())),
        }
    }

    fn feed(&mut self, sensor: SensorType, minute: i64, value: f64) -> Result<PipelineResult, DetectError> {
        let reading = Reading::new(self.pipeline.plot_id(), sensor, t0() + Duration::minutes(minute), value);
        self.pipeline.ingest_at(reading, now())
    }

    /// Twenty quiet minutes on every sensor.
    fn settle(&mut self) {
        let baselines = [
            (SensorType::Moisture, 60.0),
            (SensorType::Temperature, 22.0),
            (SensorType::Humidity, 65.0),
        ];
        for minute in 0..20 {
            let wobble = [0.3, -0.2, 0.25, -0.35][minute as usize % 4];
            for (sensor, base) in baselines {
                let r = self.feed(sensor, minute, base + wobble).unwrap();
                assert!(r.event.is_none(), "{} flagged during settle", sensor);
            }
        }
    }
}

fn rules(result: &PipelineResult) -> Vec<&str> {
    result.recommendations.iter().map(|r| r.rule.as_str()).collect()
}

#[test]
fn sustained_heat_recommends_heat_stress_mitigation() {
    let mut field = Field::new(1);
    field.settle();

    let mut kinds = Vec::new();
    for i in 0..8 {
        let r = field.feed(SensorType::Temperature, 20 + i, 34.0).unwrap();
        let event = r.event.as_ref().expect("reading above max should be flagged");
        assert_eq!(event.sensor_type, SensorType::Temperature);
        assert!(rules(&r).contains(&"heat_stress_mitigation"), "reading {}: {:?}", i, rules(&r));
        kinds.push(event.kind);
    }

    // The jump reads as a spike until the window absorbs it; the run that
    // stays beyond max then turns into a drift.
    assert_eq!(
        kinds,
        vec![
            AnomalyKind::Spike,
            AnomalyKind::Spike,
            AnomalyKind::Spike,
            AnomalyKind::OutOfRange,
            AnomalyKind::Drift,
            AnomalyKind::Drift,
            AnomalyKind::Drift,
            AnomalyKind::Drift,
        ]
    );
}

#[test]
fn drop_and_spike_incident_yields_three_recommendations() {
    let mut field = Field::new(2);
    field.settle();

    let drop = field.feed(SensorType::Moisture, 20, 24.0).unwrap();
    assert_eq!(drop.event.as_ref().unwrap().kind, AnomalyKind::Drop);
    assert_eq!(rules(&drop), vec!["irrigation_check"]);

    let spike = field.feed(SensorType::Temperature, 22, 38.0).unwrap();
    assert_eq!(spike.event.as_ref().unwrap().kind, AnomalyKind::Spike);
    let incident = spike.incident.as_ref().unwrap();
    assert_eq!(incident.events.len(), 2);
    assert_eq!(incident.id, drop.incident.as_ref().unwrap().id);

    let fired = rules(&spike);
    assert!(fired.len() >= 3, "{:?}", fired);
    assert!(fired.contains(&"irrigation_check"));
    assert!(fired.contains(&"heat_stress_mitigation"));
    assert!(fired.contains(&"full_inspection"));
}

#[test]
fn plots_never_share_incidents() {
    let mut a = Field::new(10);
    let mut b = Field::new(11);
    a.settle();
    b.settle();

    let ra = a.feed(SensorType::Moisture, 20, 24.0).unwrap();
    let rb = b.feed(SensorType::Temperature, 20, 38.0).unwrap();

    let ia = ra.incident.as_ref().unwrap();
    let ib = rb.incident.as_ref().unwrap();
    assert_ne!(ia.id, ib.id);
    assert_eq!(ia.events.len(), 1);
    assert_eq!(ib.events.len(), 1);
    assert!(!rules(&rb).contains(&"full_inspection"));
}

#[test]
fn events_outside_the_window_open_a_new_incident() {
    let mut field = Field::new(4);
    field.settle();

    let first = field.feed(SensorType::Humidity, 20, 20.0).unwrap();
    // Default window is five minutes; keep the baseline going in between.
    for minute in 21..40 {
        field.feed(SensorType::Humidity, minute, 65.0).unwrap();
    }
    let second = field.feed(SensorType::Humidity, 40, 20.0).unwrap();

    let i1 = first.incident.unwrap();
    let i2 = second.incident.unwrap();
    assert_ne!(i1.id, i2.id);
    assert_eq!(i2.events.len(), 1);
}

#[test]
fn rejected_readings_leave_history_untouched() {
    let mut field = Field::new(5);
    field.settle();
    let before = field.pipeline.history(SensorType::Moisture).unwrap().len();

    assert!(matches!(
        field.feed(SensorType::Moisture, 5, 60.0),
        Err(DetectError::OutOfOrderReading { .. })
    ));
    assert!(matches!(
        field.feed(SensorType::Moisture, 30, f64::INFINITY),
        Err(DetectError::InvalidReading { .. })
    ));
    assert_eq!(field.pipeline.history(SensorType::Moisture).unwrap().len(), before);
}
