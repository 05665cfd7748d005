//! TOML configuration for the detection pipeline.
//!
//! Safety-relevant bounds (`min` / `max` for every sensor type) have no
//! defaults when read from a file: a config that omits them is rejected at
//! load time rather than at the first reading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::detect::strategy::Strategy;
use crate::reading::SensorType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration for {section}: {reason}")]
    Invalid { section: String, reason: String },
}

fn invalid(section: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        section: section.into(),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration consumed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Readings timestamped further than this into the future are rejected.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,
    /// Lower bound applied to the rolling standard deviation before dividing.
    #[serde(default = "default_stddev_floor")]
    pub stddev_floor: f64,
    #[serde(default)]
    pub severity: SeverityThresholds,
    pub sensors: SensorsConfig,
}

fn default_clock_skew() -> u64 {
    30
}

fn default_stddev_floor() -> f64 {
    1e-6
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            clock_skew_seconds: default_clock_skew(),
            stddev_floor: default_stddev_floor(),
            severity: SeverityThresholds::default(),
            sensors: SensorsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(path = %path.display(), "loaded pipeline configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `CROPSENTINEL_CONFIG` environment variable.
    /// 2. `/etc/cropsentinel/cropsentinel.toml`.
    /// 3. Fall back to compiled-in defaults.
    ///
    /// A file that exists but fails validation is an error, never a silent
    /// fallback to defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        if let Ok(env_path) = std::env::var("CROPSENTINEL_CONFIG") {
            let path = Path::new(&env_path);
            if path.exists() {
                return Self::load(path);
            }
            warn!(path = %path.display(), "CROPSENTINEL_CONFIG points at a missing file, trying fallback");
        }

        let system_path = Path::new("/etc/cropsentinel/cropsentinel.toml");
        if system_path.exists() {
            return Self::load(system_path);
        }

        debug!("no config file found, using compiled-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.stddev_floor.is_finite() && self.stddev_floor > 0.0) {
            return Err(invalid("stddev_floor", "must be a positive finite number"));
        }
        self.severity.validate()?;
        for sensor in SensorType::ALL {
            self.sensors.get(sensor).validate(sensor)?;
        }
        Ok(())
    }

    pub fn sensor(&self, sensor: SensorType) -> &SensorConfig {
        self.sensors.get(sensor)
    }

    /// Correlation window shared by all sensors of a plot: the widest one configured.
    pub fn correlation_window(&self) -> chrono::Duration {
        let secs = SensorType::ALL
            .iter()
            .map(|s| self.sensors.get(*s).correlation_window_seconds)
            .max()
            .unwrap_or(0);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_seconds as i64)
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Confidence cut-offs for the low / medium / high severity tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeverityThresholds {
    /// Confidence at which severity becomes `medium`.
    pub medium: f64,
    /// Confidence at which severity becomes `high`.
    pub high: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium: 0.5,
            high: 0.85,
        }
    }
}

impl SeverityThresholds {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0 < self.medium && self.medium < self.high && self.high <= 1.0) {
            return Err(invalid(
                "severity",
                format!(
                    "thresholds must satisfy 0 < medium < high <= 1 (got medium={}, high={})",
                    self.medium, self.high
                ),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Per-sensor-type sections. All three are required in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorsConfig {
    pub moisture: SensorConfig,
    pub temperature: SensorConfig,
    pub humidity: SensorConfig,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            moisture: SensorConfig::with_bounds(35.0, 85.0),
            temperature: SensorConfig::with_bounds(10.0, 32.0),
            humidity: SensorConfig::with_bounds(30.0, 85.0),
        }
    }
}

impl SensorsConfig {
    pub fn get(&self, sensor: SensorType) -> &SensorConfig {
        match sensor {
            SensorType::Moisture => &self.moisture,
            SensorType::Temperature => &self.temperature,
            SensorType::Humidity => &self.humidity,
        }
    }

    pub fn get_mut(&mut self, sensor: SensorType) -> &mut SensorConfig {
        match sensor {
            SensorType::Moisture => &mut self.moisture,
            SensorType::Temperature => &mut self.temperature,
            SensorType::Humidity => &mut self.humidity,
        }
    }
}

/// Detection policy for one sensor type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// Scoring strategy: `threshold`, `zscore` or `outlier`.
    #[serde(default)]
    pub strategy: Strategy,
    /// Lower bound of the acceptable range.
    pub min: f64,
    /// Upper bound of the acceptable range.
    pub max: f64,
    /// |z| at or beyond which the z-score strategy flags a reading.
    #[serde(default = "default_z_max")]
    pub z_max: f64,
    /// |z| at which z-score confidence saturates at 1.0. Defaults to `2 * z_max`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_saturation: Option<f64>,
    /// Minimum |z| of each trailing reading for an excursion to count as drift.
    #[serde(default = "default_drift_z")]
    pub drift_z: f64,
    /// Number of trailing readings that must share the deviation sign for drift.
    #[serde(default = "default_drift_run")]
    pub drift_run: usize,
    /// Outlier score at or above which the outlier strategy flags a reading.
    #[serde(default = "default_outlier_min_score")]
    pub outlier_min_score: f64,
    /// Rolling window capacity.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Samples required before rolling statistics are trusted.
    #[serde(default = "default_min_history_fill")]
    pub min_history_fill: usize,
    /// Maximum gap between anomalies chained into one incident.
    #[serde(default = "default_correlation_window")]
    pub correlation_window_seconds: u64,
}

fn default_z_max() -> f64 {
    3.0
}
fn default_drift_z() -> f64 {
    1.0
}
fn default_drift_run() -> usize {
    4
}
fn default_outlier_min_score() -> f64 {
    0.6
}
fn default_window_size() -> usize {
    100
}
fn default_min_history_fill() -> usize {
    5
}
fn default_correlation_window() -> u64 {
    300
}

impl SensorConfig {
    /// Defaults for everything except the range, which is always explicit.
    pub fn with_bounds(min: f64, max: f64) -> Self {
        Self {
            strategy: Strategy::default(),
            min,
            max,
            z_max: default_z_max(),
            z_saturation: None,
            drift_z: default_drift_z(),
            drift_run: default_drift_run(),
            outlier_min_score: default_outlier_min_score(),
            window_size: default_window_size(),
            min_history_fill: default_min_history_fill(),
            correlation_window_seconds: default_correlation_window(),
        }
    }

    pub fn z_saturation(&self) -> f64 {
        self.z_saturation.unwrap_or(2.0 * self.z_max)
    }

    pub fn validate(&self, sensor: SensorType) -> Result<(), ConfigError> {
        let section = format!("sensors.{}", sensor);
        let (lo, hi) = sensor.domain();

        if !(self.min.is_finite() && self.max.is_finite()) || self.min >= self.max {
            return Err(invalid(
                section,
                format!("min must be below max (got min={}, max={})", self.min, self.max),
            ));
        }
        if self.min < lo || self.max > hi {
            return Err(invalid(
                section,
                format!("range [{}, {}] exceeds the physical domain [{}, {}]", self.min, self.max, lo, hi),
            ));
        }
        if !(self.z_max.is_finite() && self.z_max > 0.0) {
            return Err(invalid(section, "z_max must be positive"));
        }
        if !self.z_saturation().is_finite() {
            return Err(invalid(section, "z_saturation must be a finite number"));
        }
        if self.z_saturation() < self.z_max {
            return Err(invalid(section, "z_saturation must not be below z_max"));
        }
        if !(self.drift_z.is_finite() && self.drift_z > 0.0) {
            return Err(invalid(section, "drift_z must be positive"));
        }
        if self.drift_run == 0 {
            return Err(invalid(section, "drift_run must be at least 1"));
        }
        if !(self.outlier_min_score > 0.0 && self.outlier_min_score <= 1.0) {
            return Err(invalid(section, "outlier_min_score must be in (0, 1]"));
        }
        if self.min_history_fill < 2 {
            return Err(invalid(section, "min_history_fill must be at least 2"));
        }
        if self.window_size < self.min_history_fill {
            return Err(invalid(
                section,
                format!(
                    "window_size ({}) must be at least min_history_fill ({})",
                    self.window_size, self.min_history_fill
                ),
            ));
        }
        if self.drift_run > self.window_size {
            return Err(invalid(section, "drift_run cannot exceed window_size"));
        }
        if self.correlation_window_seconds == 0 {
            return Err(invalid(section, "correlation_window_seconds must be positive"));
        }
        Ok(())
    }
}
