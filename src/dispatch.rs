//! Concurrent ingestion across plots.
//!
//! Each plot gets one tokio task that exclusively owns its [`PlotPipeline`].
//! Readings are routed to that task over a bounded channel, so plots never
//! share state and readings of one plot are processed in submission order.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::{PipelineResult, PlotPipeline};
use crate::reading::{PlotId, Reading};
use crate::storage::RecordSink;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Counters kept by one plot worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Readings accepted into the plot's history.
    pub processed: u64,
    pub rejected: u64,
    pub anomalies: u64,
    pub recommendations: u64,
    /// Records the sink failed to store.
    pub sink_failures: u64,
}

impl WorkerStats {
    fn absorb(&mut self, other: &WorkerStats) {
        self.processed += other.processed;
        self.rejected += other.rejected;
        self.anomalies += other.anomalies;
        self.recommendations += other.recommendations;
        self.sink_failures += other.sink_failures;
    }
}

/// Outcome of a dispatcher run, returned by [`Dispatcher::shutdown`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchSummary {
    pub plots: BTreeMap<PlotId, WorkerStats>,
    pub totals: WorkerStats,
}

struct Worker {
    tx: mpsc::Sender<Reading>,
    handle: JoinHandle<WorkerStats>,
}

pub struct Dispatcher {
    config: Arc<PipelineConfig>,
    sink: Option<Arc<dyn RecordSink>>,
    notifier: Arc<dyn Notifier>,
    capacity: usize,
    workers: BTreeMap<PlotId, Worker>,
}

impl Dispatcher {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            config,
            sink: None,
            notifier: Arc::new(LogNotifier),
            capacity: DEFAULT_CHANNEL_CAPACITY,
            workers: BTreeMap::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Plots that currently have a worker.
    pub fn plots(&self) -> impl Iterator<Item = PlotId> + '_ {
        self.workers.keys().copied()
    }

    /// Route a reading to its plot's worker, starting one if needed.
    /// Waits while that worker's channel is full.
    pub async fn submit(&mut self, reading: Reading) -> Result<()> {
        let plot_id = reading.plot_id;
        if !self.workers.contains_key(&plot_id) {
            let worker = self.spawn_worker(plot_id);
            self.workers.insert(plot_id, worker);
        }
        let worker = self
            .workers
            .get(&plot_id)
            .ok_or_else(|| anyhow!("no worker for plot {}", plot_id))?;
        worker
            .tx
            .send(reading)
            .await
            .map_err(|_| anyhow!("worker for plot {} has stopped", plot_id))
    }

    /// Close every channel, let the workers drain, and collect their stats.
    pub async fn shutdown(self) -> Result<DispatchSummary> {
        let (plots, handles): (Vec<PlotId>, Vec<JoinHandle<WorkerStats>>) = self
            .workers
            .into_iter()
            .map(|(plot, worker)| {
                drop(worker.tx);
                (plot, worker.handle)
            })
            .unzip();

        let mut summary = DispatchSummary::default();
        for (plot, joined) in plots.into_iter().zip(join_all(handles).await) {
            let stats = joined.map_err(|e| anyhow!("worker for plot {} failed: {}", plot, e))?;
            summary.totals.absorb(&stats);
            summary.plots.insert(plot, stats);
        }
        info!(
            plots = summary.plots.len(),
            processed = summary.totals.processed,
            anomalies = summary.totals.anomalies,
            "dispatcher stopped"
        );
        Ok(summary)
    }

    fn spawn_worker(&self, plot_id: PlotId) -> Worker {
        debug!(plot_id, "starting plot worker");
        let (tx, rx) = mpsc::channel(self.capacity);
        let pipeline = PlotPipeline::new(plot_id, self.config.clone());
        let handle = tokio::spawn(run_worker(pipeline, rx, self.sink.clone(), self.notifier.clone()));
        Worker { tx, handle }
    }
}

async fn run_worker(
    mut pipeline: PlotPipeline,
    mut rx: mpsc::Receiver<Reading>,
    sink: Option<Arc<dyn RecordSink>>,
    notifier: Arc<dyn Notifier>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    while let Some(reading) = rx.recv().await {
        // Rejections are already logged by the pipeline.
        let result = match pipeline.ingest(reading) {
            Ok(r) => r,
            Err(_) => {
                stats.rejected += 1;
                continue;
            }
        };
        stats.processed += 1;

        let PipelineResult {
            event: Some(event),
            incident: Some(incident),
            recommendations,
            ..
        } = result
        else {
            continue;
        };
        stats.anomalies += 1;
        stats.recommendations += recommendations.len() as u64;

        if let Some(sink) = &sink {
            let sink = sink.clone();
            let recs = recommendations.clone();
            let stored = tokio::task::spawn_blocking(move || -> Result<()> {
                sink.store_event(&event)?;
                sink.store_recommendations(&recs)
            })
            .await;
            match stored {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    stats.sink_failures += 1;
                    error!(plot_id = pipeline.plot_id(), "Failed to store anomaly records: {:#}", e);
                }
                Err(e) => {
                    stats.sink_failures += 1;
                    error!(plot_id = pipeline.plot_id(), "Storage task panicked: {}", e);
                }
            }
        }

        if let Err(e) = notifier.notify(&incident, &recommendations).await {
            error!(plot_id = pipeline.plot_id(), incident = %incident.id, "Notification failed: {:#}", e);
        }
    }

    debug!(plot_id = pipeline.plot_id(), processed = stats.processed, "plot worker drained");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use crate::reading::SensorType;
    use crate::storage::SqliteStore;
    use chrono::{Duration, TimeZone, Utc};

    fn reading(plot: PlotId, minute: i64, value: f64) -> Reading {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
        Reading::new(plot, SensorType::Moisture, t0 + Duration::minutes(minute), value)
    }

    #[tokio::test]
    async fn test_plots_are_isolated_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("dispatch.db");
        let store = Arc::new(SqliteStore::open(db.to_str().unwrap()).unwrap());

        let mut dispatcher = Dispatcher::new(Arc::new(PipelineConfig::default()))
            .with_sink(store.clone())
            .with_notifier(Arc::new(NullNotifier))
            .with_channel_capacity(4);

        for minute in 0..20 {
            let wobble = if minute % 2 == 0 { 0.4 } else { -0.4 };
            dispatcher.submit(reading(1, minute, 60.0 + wobble)).await.unwrap();
            dispatcher.submit(reading(2, minute, 62.0 + wobble)).await.unwrap();
        }
        // Plot 1 collapses, plot 2 keeps going.
        dispatcher.submit(reading(1, 20, 25.0)).await.unwrap();
        dispatcher.submit(reading(2, 20, 62.3)).await.unwrap();
        // Out of order for plot 2.
        dispatcher.submit(reading(2, 3, 62.0)).await.unwrap();

        let mut plots: Vec<_> = dispatcher.plots().collect();
        plots.sort();
        assert_eq!(plots, vec![1, 2]);

        let summary = dispatcher.shutdown().await.unwrap();
        assert_eq!(summary.plots[&1].processed, 21);
        assert_eq!(summary.plots[&1].anomalies, 1);
        assert_eq!(summary.plots[&2].anomalies, 0);
        assert_eq!(summary.plots[&2].rejected, 1);
        assert_eq!(summary.totals.processed, 42);
        assert_eq!(summary.totals.sink_failures, 0);

        let events = store.list_recent_events(None, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plot_id, 1);
        let recs = store.list_recommendations(Some(1), 10).unwrap();
        assert!(recs.iter().any(|r| r.rule == "irrigation_check"));
    }

    #[tokio::test]
    async fn test_shutdown_without_readings() {
        let dispatcher = Dispatcher::new(Arc::new(PipelineConfig::default()));
        let summary = dispatcher.shutdown().await.unwrap();
        assert!(summary.plots.is_empty());
        assert_eq!(summary.totals, WorkerStats::default());
    }
}
