//! Grouping of near-simultaneous anomalies on a plot into incidents.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::detect::{AnomalyEvent, AnomalyKind};
use crate::reading::PlotId;

/// Upper bound on events kept open per plot. An incident that keeps chaining
/// past this loses its oldest members.
const MAX_TRAILING_EVENTS: usize = 512;

/// A time-correlated group of anomaly events on one plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    /// Derived from the plot and the first event, so the same grouping
    /// always yields the same id.
    pub id: String,
    pub plot_id: PlotId,
    /// Ordered by (timestamp, sensor type name).
    pub events: Vec<AnomalyEvent>,
}

impl Incident {
    fn open(first: AnomalyEvent) -> Self {
        Self {
            id: format!(
                "{}-{}-{}",
                first.plot_id,
                first.timestamp.timestamp_millis(),
                first.sensor_type
            ),
            plot_id: first.plot_id,
            events: vec![first],
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.events.first().map(|e| e.timestamp).unwrap_or_default()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.events.last().map(|e| e.timestamp).unwrap_or_default()
    }

    pub fn kinds(&self) -> BTreeSet<AnomalyKind> {
        self.events.iter().map(|e| e.kind).collect()
    }

    pub fn contains(&self, event_id: &uuid::Uuid) -> bool {
        self.events.iter().any(|e| &e.id == event_id)
    }
}

/// Group events into incidents.
///
/// Events are stably sorted by timestamp, ties broken by sensor type name.
/// An event joins its plot's open incident when it falls within `window` of
/// that incident's latest event, so spans chain: 0s, 4s and 9s with a 5s
/// window form one incident. Events on different plots never share an
/// incident. Output is ordered by each incident's earliest event.
pub fn correlate(events: &[AnomalyEvent], window: Duration) -> Vec<Incident> {
    let mut sorted: Vec<&AnomalyEvent> = events.iter().collect();
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.sensor_type.as_str().cmp(b.sensor_type.as_str()))
    });

    let mut incidents: Vec<Incident> = Vec::new();
    let mut open: BTreeMap<PlotId, usize> = BTreeMap::new();

    for event in sorted {
        match open.get(&event.plot_id) {
            Some(&idx) if event.timestamp - incidents[idx].end() <= window => {
                incidents[idx].events.push(event.clone());
            }
            _ => {
                open.insert(event.plot_id, incidents.len());
                incidents.push(Incident::open(event.clone()));
            }
        }
    }

    incidents.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| a.plot_id.cmp(&b.plot_id)));
    incidents
}

/// Recent events of one plot, kept while the incident they belong to may
/// still grow.
#[derive(Debug, Clone)]
pub struct TrailingEvents {
    window: Duration,
    events: VecDeque<AnomalyEvent>,
}

impl TrailingEvents {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Add an event and return the incident it belongs to, as grouped from
    /// every still-open event.
    pub fn push(&mut self, event: AnomalyEvent) -> Incident {
        self.close_expired(event.timestamp);
        if self.events.len() == MAX_TRAILING_EVENTS {
            self.events.pop_front();
        }
        let id = event.id;
        let fallback = Incident::open(event.clone());
        self.events.push_back(event);

        correlate(self.events.make_contiguous(), self.window)
            .into_iter()
            .find(|i| i.contains(&id))
            .unwrap_or(fallback)
    }

    /// Drop events whose incident ended more than `window` before `now`.
    pub fn close_expired(&mut self, now: DateTime<Utc>) {
        if self.events.is_empty() {
            return;
        }
        let incidents = correlate(self.events.make_contiguous(), self.window);
        let keep: BTreeSet<uuid::Uuid> = incidents
            .iter()
            .filter(|i| now - i.end() <= self.window)
            .flat_map(|i| i.events.iter().map(|e| e.id))
            .collect();
        self.events.retain(|e| keep.contains(&e.id));
    }
}
