//! Outbound alerting for incidents.

use anyhow::Result;
use tracing::warn;

use crate::detect::Incident;
use crate::recommend::Recommendation;

/// Receives every incident update together with its recommendations.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, incident: &Incident, recommendations: &[Recommendation]) -> Result<()>;
}

/// Writes one structured warning per recommendation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, incident: &Incident, recommendations: &[Recommendation]) -> Result<()> {
        for rec in recommendations {
            warn!(
                plot_id = incident.plot_id,
                incident = %incident.id,
                events = incident.events.len(),
                rule = %rec.rule,
                confidence = rec.confidence,
                action = %rec.action,
                "{}",
                rec.explanation
            );
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _incident: &Incident, _recommendations: &[Recommendation]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{correlate, AnomalyEvent, AnomalyKind, Baseline, Direction, Severity};
    use crate::reading::SensorType;
    use crate::recommend::RecommendationEngine;
    use chrono::{Duration, TimeZone, Utc};

    #[tokio::test]
    async fn test_notifiers_accept_incident() {
        let event = AnomalyEvent {
            id: uuid::Uuid::new_v4(),
            plot_id: 2,
            sensor_type: SensorType::Humidity,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 5, 6, 0, 0).unwrap(),
            kind: AnomalyKind::OutOfRange,
            direction: Direction::Below,
            severity: Severity::Low,
            confidence: 0.4,
            triggering_value: 22.0,
            baseline: Baseline {
                mean: 60.0,
                stddev: 4.0,
                samples: 12,
            },
            z_score: None,
        };
        let incidents = correlate(&[event], Duration::seconds(60));
        let recs = RecommendationEngine::default().recommend(&incidents[0]);
        assert!(!recs.is_empty());

        LogNotifier.notify(&incidents[0], &recs).await.unwrap();
        NullNotifier.notify(&incidents[0], &recs).await.unwrap();
    }
}
