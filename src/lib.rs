//! CropSentinel -- sensor anomaly detection and advisories for field plots.
//!
//! Readings of soil moisture, air temperature and humidity are scored
//! against each sensor's recent history, anomalies are grouped into
//! per-plot incidents, and a fixed rule table turns every incident into
//! actionable recommendations.

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod evaluate;
pub mod notify;
pub mod pipeline;
pub mod reading;
pub mod recommend;
pub mod simulate;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::config::PipelineConfig;
use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::notify::Notifier;
use crate::reading::Reading;
use crate::storage::RecordSink;

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub lines: u64,
    /// Lines that did not parse as a reading.
    pub malformed: u64,
    #[serde(flatten)]
    pub dispatch: DispatchSummary,
}

/// Feed JSON-lines readings through a [`Dispatcher`] until the input ends.
pub async fn replay<R>(
    input: R,
    config: Arc<PipelineConfig>,
    sink: Option<Arc<dyn RecordSink>>,
    notifier: Arc<dyn Notifier>,
) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut dispatcher = Dispatcher::new(config).with_notifier(notifier);
    if let Some(sink) = sink {
        dispatcher = dispatcher.with_sink(sink);
    }

    let mut lines = input.lines();
    let mut summary = ReplaySummary::default();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;
        match serde_json::from_str::<Reading>(line) {
            Ok(reading) => dispatcher.submit(reading).await?,
            Err(e) => {
                summary.malformed += 1;
                tracing::warn!(line = summary.lines, "Skipping malformed reading: {}", e);
            }
        }
    }

    summary.dispatch = dispatcher.shutdown().await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;

    #[tokio::test]
    async fn test_replay_counts_malformed_lines() {
        let input = concat!(
            r#"{"plot_id":1,"sensor_type":"moisture","timestamp":"2024-06-01T06:00:00Z","value":61.0}"#,
            "\n\nnot json\n",
            r#"{"plot_id":1,"sensor_type":"moisture","timestamp":"2024-06-01T06:01:00Z","value":60.5,"source":"real_sensor"}"#,
            "\n",
        );
        let summary = replay(
            input.as_bytes(),
            Arc::new(PipelineConfig::default()),
            None,
            Arc::new(NullNotifier),
        )
        .await
        .unwrap();
        assert_eq!(summary.lines, 3);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.dispatch.totals.processed, 2);
    }
}
