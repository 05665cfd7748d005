//! Synthetic field data with ground-truth labels.
//!
//! Every step produces one reading per sensor for each plot. Temperature
//! follows a diurnal curve peaking at noon, humidity moves inversely to it,
//! and moisture hovers around 60 %. A configurable share of plot-steps gets
//! one injected anomaly, which is recorded on the affected reading.

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::reading::{PlotId, Reading, SensorType, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectedAnomaly {
    LowMoisture,
    HighTemperature,
    LowTemperature,
    LowHumidity,
    HighHumidity,
}

impl InjectedAnomaly {
    pub const ALL: [InjectedAnomaly; 5] = [
        InjectedAnomaly::LowMoisture,
        InjectedAnomaly::HighTemperature,
        InjectedAnomaly::LowTemperature,
        InjectedAnomaly::LowHumidity,
        InjectedAnomaly::HighHumidity,
    ];

    pub fn sensor(&self) -> SensorType {
        match self {
            InjectedAnomaly::LowMoisture => SensorType::Moisture,
            InjectedAnomaly::HighTemperature | InjectedAnomaly::LowTemperature => SensorType::Temperature,
            InjectedAnomaly::LowHumidity | InjectedAnomaly::HighHumidity => SensorType::Humidity,
        }
    }

    /// Range the injected value is drawn from.
    pub fn range(&self) -> (f64, f64) {
        match self {
            InjectedAnomaly::LowMoisture => (10.0, 35.0),
            InjectedAnomaly::HighTemperature => (32.0, 42.0),
            InjectedAnomaly::LowTemperature => (5.0, 10.0),
            InjectedAnomaly::LowHumidity => (10.0, 30.0),
            InjectedAnomaly::HighHumidity => (85.0, 95.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub interval_seconds: u64,
    pub steps: usize,
    /// Probability that a plot-step carries an injected anomaly.
    pub anomaly_ratio: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            steps: 30,
            anomaly_ratio: 0.3,
        }
    }
}

/// A generated reading and the anomaly injected into it, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledReading {
    #[serde(flatten)]
    pub reading: Reading,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected: Option<InjectedAnomaly>,
}

impl LabelledReading {
    pub fn is_anomaly(&self) -> bool {
        self.injected.is_some()
    }
}

pub struct Simulator {
    rng: StdRng,
    plots: Vec<PlotId>,
    config: SimulatorConfig,
    start: DateTime<Utc>,
}

impl Simulator {
    /// The run ends at the current time, so no reading lies in the future.
    pub fn new(seed: u64, plots: Vec<PlotId>, config: SimulatorConfig) -> Self {
        let span = config.interval_seconds as i64 * config.steps.saturating_sub(1) as i64;
        Self {
            rng: StdRng::seed_from_u64(seed),
            plots,
            config,
            start: Utc::now() - Duration::seconds(span),
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// All readings of the run, ordered by step, then plot, then sensor.
    pub fn generate(&mut self) -> Vec<LabelledReading> {
        let mut out = Vec::with_capacity(self.config.steps * self.plots.len() * SensorType::ALL.len());
        let plots = self.plots.clone();
        for step in 0..self.config.steps {
            let at = self.start + Duration::seconds(step as i64 * self.config.interval_seconds as i64);
            for &plot in &plots {
                out.extend(self.step(plot, at));
            }
        }
        out
    }

    fn step(&mut self, plot_id: PlotId, at: DateTime<Utc>) -> [LabelledReading; 3] {
        let hour = at.hour() as f64 + at.minute() as f64 / 60.0;
        let base_temp = 18.0 + 10.0 * (1.0 - (hour - 12.0).abs() / 12.0).max(0.0);

        let mut temperature = base_temp + self.noise(1.0);
        let mut moisture = 60.0 + self.noise(5.0);
        let mut humidity = 70.0 - (temperature - 18.0) + self.noise(5.0);

        let injected = if self.rng.gen::<f64>() < self.config.anomaly_ratio {
            let kind = InjectedAnomaly::ALL[self.rng.gen_range(0..InjectedAnomaly::ALL.len())];
            let (lo, hi) = kind.range();
            let value = self.rng.gen_range(lo..hi);
            match kind.sensor() {
                SensorType::Moisture => moisture = value,
                SensorType::Temperature => temperature = value,
                SensorType::Humidity => humidity = value,
            }
            Some(kind)
        } else {
            None
        };

        let label = |sensor: SensorType| injected.filter(|k| k.sensor() == sensor);
        let make = |sensor: SensorType, value: f64| LabelledReading {
            reading: Reading {
                plot_id,
                sensor_type: sensor,
                timestamp: at,
                value,
                source: Source::Simulator,
            },
            injected: label(sensor),
        };

        [
            make(SensorType::Moisture, round2(moisture.clamp(5.0, 95.0))),
            make(SensorType::Temperature, round2(temperature.clamp(5.0, 45.0))),
            make(SensorType::Humidity, round2(humidity.clamp(10.0, 95.0))),
        ]
    }

    fn noise(&mut self, stddev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * stddev
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn config(steps: usize, anomaly_ratio: f64) -> SimulatorConfig {
        SimulatorConfig {
            interval_seconds: 3600,
            steps,
            anomaly_ratio,
        }
    }

    #[test]
    fn test_same_seed_same_run() {
        let a = Simulator::new(7, vec![1, 2], config(24, 0.3)).with_start(start()).generate();
        let b = Simulator::new(7, vec![1, 2], config(24, 0.3)).with_start(start()).generate();
        assert_eq!(a, b);
        assert_eq!(a.len(), 24 * 2 * 3);
    }

    #[test]
    fn test_values_clamped_and_labelled() {
        let run = Simulator::new(11, vec![5], config(200, 0.5)).with_start(start()).generate();
        let mut injected = 0;
        for lr in &run {
            let v = lr.reading.value;
            match lr.reading.sensor_type {
                SensorType::Moisture => assert!((5.0..=95.0).contains(&v)),
                SensorType::Temperature => assert!((5.0..=45.0).contains(&v)),
                SensorType::Humidity => assert!((10.0..=95.0).contains(&v)),
            }
            if let Some(kind) = lr.injected {
                injected += 1;
                assert_eq!(kind.sensor(), lr.reading.sensor_type);
                let (lo, hi) = kind.range();
                assert!(v >= lo - 0.01 && v <= hi + 0.01, "{:?} {}", kind, v);
            }
        }
        assert!(injected > 50 && injected < 150, "injected {}", injected);
    }

    #[test]
    fn test_no_anomalies_at_zero_ratio() {
        let run = Simulator::new(3, vec![1], config(48, 0.0)).with_start(start()).generate();
        assert!(run.iter().all(|lr| !lr.is_anomaly()));
    }

    #[test]
    fn test_afternoon_warmer_than_midnight() {
        let run = Simulator::new(9, vec![1], config(24 * 20, 0.0)).with_start(start()).generate();
        let mean_at = |hour: u32| {
            let vals: Vec<f64> = run
                .iter()
                .filter(|lr| lr.reading.sensor_type == SensorType::Temperature && lr.reading.timestamp.hour() == hour)
                .map(|lr| lr.reading.value)
                .collect();
            vals.iter().sum::<f64>() / vals.len() as f64
        };
        assert!(mean_at(12) > mean_at(0) + 5.0);
    }
}
