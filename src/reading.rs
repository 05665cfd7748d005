//! Sensor readings as delivered by the ingestion layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a monitored field plot.
pub type PlotId = u64;

#[derive(Debug, Error)]
#[error("unknown {what}: {value:?}")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}

/// Sensor channels reported for every plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Moisture,
    Temperature,
    Humidity,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [
        SensorType::Moisture,
        SensorType::Temperature,
        SensorType::Humidity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Moisture => "moisture",
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Moisture | SensorType::Humidity => "%",
            SensorType::Temperature => "°C",
        }
    }

    /// Physically plausible range. Values outside it are rejected at ingestion.
    pub fn domain(&self) -> (f64, f64) {
        match self {
            SensorType::Moisture | SensorType::Humidity => (0.0, 100.0),
            SensorType::Temperature => (-40.0, 60.0),
        }
    }
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moisture" => Ok(SensorType::Moisture),
            "temperature" => Ok(SensorType::Temperature),
            "humidity" => Ok(SensorType::Humidity),
            other => Err(ParseEnumError {
                what: "sensor type",
                value: other.to_string(),
            }),
        }
    }
}

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[default]
    Simulator,
    RealSensor,
}

/// One timestamped measurement for a plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub plot_id: PlotId,
    pub sensor_type: SensorType,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub source: Source,
}

impl Reading {
    pub fn new(plot_id: PlotId, sensor_type: SensorType, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            plot_id,
            sensor_type,
            timestamp,
            value,
            source: Source::Simulator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_json_defaults_source() {
        let json = r#"{"plot_id":7,"sensor_type":"moisture","timestamp":"2024-05-01T06:00:00Z","value":41.5}"#;
        let r: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(r.plot_id, 7);
        assert_eq!(r.sensor_type, SensorType::Moisture);
        assert_eq!(r.source, Source::Simulator);
    }

    #[test]
    fn test_sensor_type_parse() {
        assert_eq!("humidity".parse::<SensorType>().unwrap(), SensorType::Humidity);
        assert!("pressure".parse::<SensorType>().is_err());
    }
}
