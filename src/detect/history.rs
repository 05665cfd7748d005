use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::detect::{Baseline, DetectError};
use crate::reading::Reading;

/// Bounded, time-ordered window of recent readings for one (plot, sensor)
/// pair, with rolling mean and sample standard deviation.
///
/// Statistics are maintained with Welford's update on insertion and its
/// inverse on eviction, so both stay O(1) per reading and do not suffer the
/// cancellation of a naive sum / sum-of-squares pair.
#[derive(Debug, Clone)]
pub struct ReadingHistory {
    capacity: usize,
    readings: VecDeque<Reading>,
    mean: f64,
    m2: f64,
}

impl ReadingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: VecDeque::with_capacity(capacity),
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Retained readings, oldest first.
    pub fn window(&self) -> &VecDeque<Reading> {
        &self.readings
    }

    pub fn last(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn mean(&self) -> f64 {
        if self.readings.is_empty() {
            return 0.0;
        }
        self.mean
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(&self) -> f64 {
        let n = self.readings.len();
        if n < 2 {
            return 0.0;
        }
        (self.m2 / (n - 1) as f64).max(0.0)
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Whether enough samples are retained for the statistics to be trusted.
    pub fn is_reliable(&self, min_fill: usize) -> bool {
        self.readings.len() >= min_fill
    }

    pub fn require(&self, min_fill: usize) -> Result<(), DetectError> {
        if !self.is_reliable(min_fill) {
            return Err(DetectError::InsufficientBaseline {
                needed: min_fill,
                have: self.readings.len(),
            });
        }
        Ok(())
    }

    pub fn baseline(&self) -> Baseline {
        Baseline {
            mean: self.mean(),
            stddev: self.stddev(),
            samples: self.len(),
        }
    }

    /// Reject timestamps older than the newest retained reading.
    pub fn check_order(&self, reading: &Reading) -> Result<(), DetectError> {
        match self.readings.back() {
            Some(last) if reading.timestamp < last.timestamp => Err(DetectError::OutOfOrderReading {
                plot_id: reading.plot_id,
                sensor: reading.sensor_type,
                timestamp: reading.timestamp,
                last: last.timestamp,
            }),
            _ => Ok(()),
        }
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.readings.back().map(|r| r.timestamp)
    }

    /// Append a reading, evicting the oldest one once at capacity.
    pub fn record(&mut self, reading: Reading) -> Result<(), DetectError> {
        self.check_order(&reading)?;
        if self.readings.len() == self.capacity {
            if let Some(oldest) = self.readings.pop_front() {
                self.remove_sample(oldest.value);
            }
        }
        self.add_sample(reading.value);
        self.readings.push_back(reading);
        Ok(())
    }

    // Called before the reading is pushed.
    fn add_sample(&mut self, x: f64) {
        let n = (self.readings.len() + 1) as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);
    }

    // Called after the reading is popped.
    fn remove_sample(&mut self, x: f64) {
        let n = self.readings.len();
        if n == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = x - self.mean;
        self.mean -= delta / n as f64;
        self.m2 -= delta * (x - self.mean);
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }
    }
}
