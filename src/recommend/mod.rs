//! Rule-based recommendations for anomaly incidents.

pub mod rules;
pub mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::{AnomalyEvent, Incident};
use crate::reading::PlotId;

pub use rules::{Predicate, Rule, RULES};

/// An advisory derived from an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub incident_ref: String,
    pub plot_id: PlotId,
    pub rule: String,
    pub action: String,
    pub explanation: String,
    /// Highest confidence among the events that matched the rule.
    pub confidence: f64,
}

/// Evaluates an ordered rule table against incidents.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationEngine {
    rules: &'static [Rule],
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self { rules: &RULES }
    }
}

impl RecommendationEngine {
    pub fn with_rules(rules: &'static [Rule]) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &'static [Rule] {
        self.rules
    }

    /// One recommendation per matching rule, in table order.
    pub fn recommend(&self, incident: &Incident) -> Vec<Recommendation> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let matched = rule.matches(incident);
                let lead = most_confident(&matched)?;
                let bindings = bind(incident, lead);
                Some(Recommendation {
                    incident_ref: incident.id.clone(),
                    plot_id: incident.plot_id,
                    rule: rule.name.to_string(),
                    action: rule.action.to_string(),
                    explanation: template::render(rule.template, &bindings),
                    confidence: lead.confidence,
                })
            })
            .collect()
    }
}

// First event wins ties so the choice does not depend on float noise.
fn most_confident<'a>(events: &[&'a AnomalyEvent]) -> Option<&'a AnomalyEvent> {
    events.iter().copied().fold(None, |best, e| match best {
        Some(b) if b.confidence >= e.confidence => Some(b),
        _ => Some(e),
    })
}

fn bind(incident: &Incident, event: &AnomalyEvent) -> BTreeMap<&'static str, String> {
    let kinds = incident
        .kinds()
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut b = BTreeMap::new();
    b.insert("plot_id", incident.plot_id.to_string());
    b.insert("sensor_type", event.sensor_type.to_string());
    b.insert("value", format!("{:.1}", event.triggering_value));
    b.insert("unit", event.sensor_type.unit().to_string());
    b.insert("severity", event.severity.to_string());
    b.insert("kind", event.kind.to_string());
    b.insert("timestamp", event.timestamp.format("%Y-%m-%d %H:%M").to_string());
    b.insert("start", incident.start().format("%Y-%m-%d %H:%M").to_string());
    b.insert("kinds", kinds);
    b.insert("count", incident.events.len().to_string());
    b.insert("confidence", format!("{:.2}", event.confidence));
    b
}
