//! Advisory rule table.
//!
//! Rules are evaluated top to bottom and independently of each other; every
//! rule whose predicate matches contributes one recommendation.

use crate::detect::{AnomalyEvent, AnomalyKind, Direction, Incident};
use crate::reading::SensorType;

/// Placeholders every template may use.
pub const BINDINGS: &[&str] = &[
    "plot_id",
    "sensor_type",
    "value",
    "unit",
    "severity",
    "kind",
    "timestamp",
    "start",
    "kinds",
    "count",
    "confidence",
];

#[derive(Clone, Copy)]
pub enum Predicate {
    /// Matches the events satisfying the function.
    Event(fn(&AnomalyEvent) -> bool),
    /// Matches every event once the incident spans this many distinct kinds.
    DistinctKinds(usize),
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Event(_) => f.write_str("Event(..)"),
            Predicate::DistinctKinds(n) => write!(f, "DistinctKinds({})", n),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub action: &'static str,
    pub template: &'static str,
    pub predicate: Predicate,
}

impl Rule {
    /// Events of `incident` that satisfy this rule. Empty means no match.
    pub fn matches<'a>(&self, incident: &'a Incident) -> Vec<&'a AnomalyEvent> {
        match self.predicate {
            Predicate::Event(f) => incident.events.iter().filter(|e| f(*e)).collect(),
            Predicate::DistinctKinds(n) => {
                if incident.kinds().len() >= n {
                    incident.events.iter().collect()
                } else {
                    Vec::new()
                }
            }
        }
    }
}

fn moisture_low(e: &AnomalyEvent) -> bool {
    e.sensor_type == SensorType::Moisture && e.direction == Direction::Below
}

fn moisture_high(e: &AnomalyEvent) -> bool {
    e.sensor_type == SensorType::Moisture && e.direction == Direction::Above
}

fn temperature_high(e: &AnomalyEvent) -> bool {
    e.sensor_type == SensorType::Temperature && e.direction == Direction::Above
}

fn temperature_low(e: &AnomalyEvent) -> bool {
    e.sensor_type == SensorType::Temperature && e.direction == Direction::Below
}

fn humidity_any(e: &AnomalyEvent) -> bool {
    e.sensor_type == SensorType::Humidity
}

fn drifting(e: &AnomalyEvent) -> bool {
    e.kind == AnomalyKind::Drift
}

pub static RULES: [Rule; 7] = [
    Rule {
        name: "irrigation_check",
        action: "Inspect irrigation lines and pump; check for leaks",
        template: "On {timestamp}, soil moisture on plot {plot_id} fell to {value}{unit} \
                   ({kind}, {severity} severity). This points to an irrigation failure, \
                   pump fault or leak. Inspect the irrigation lines and pump for this plot.",
        predicate: Predicate::Event(moisture_low),
    },
    Rule {
        name: "drainage_check",
        action: "Check drainage and reduce irrigation",
        template: "On {timestamp}, soil moisture on plot {plot_id} rose to {value}{unit} \
                   ({kind}, {severity} severity). The root zone risks waterlogging. \
                   Check drainage and reduce irrigation for this plot.",
        predicate: Predicate::Event(moisture_high),
    },
    Rule {
        name: "heat_stress_mitigation",
        action: "Increase irrigation frequency and provide shade",
        template: "On {timestamp}, air temperature on plot {plot_id} reached {value}{unit} \
                   ({kind}, {severity} severity). This suggests heat stress on crops. \
                   Increase irrigation frequency and provide shade if possible.",
        predicate: Predicate::Event(temperature_high),
    },
    Rule {
        name: "frost_protection",
        action: "Prepare frost protection and monitor temperature",
        template: "On {timestamp}, air temperature on plot {plot_id} dropped to {value}{unit} \
                   ({kind}, {severity} severity). This may cause cold stress. \
                   Prepare frost protection measures and monitor temperature closely.",
        predicate: Predicate::Event(temperature_low),
    },
    Rule {
        name: "humidity_management",
        action: "Adjust ventilation and watch for disease",
        template: "On {timestamp}, air humidity on plot {plot_id} measured {value}{unit} \
                   ({kind}, {severity} severity). Adjust ventilation and watch for fungal \
                   disease or desiccation.",
        predicate: Predicate::Event(humidity_any),
    },
    Rule {
        name: "sensor_calibration",
        action: "Verify sensor calibration",
        template: "The {sensor_type} sensor on plot {plot_id} shows a sustained drift \
                   (latest {value}{unit} at {timestamp}). Verify its calibration before \
                   acting on its readings.",
        predicate: Predicate::Event(drifting),
    },
    Rule {
        name: "full_inspection",
        action: "Perform a full plot inspection",
        template: "{count} anomalies ({kinds}) were detected together on plot {plot_id} \
                   starting {start}. Perform a full plot inspection to identify combined \
                   stress factors.",
        predicate: Predicate::DistinctKinds(2),
    },
];
