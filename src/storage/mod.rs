//! SQLite storage layer for anomaly events and recommendations.
//!
//! The detection core never reads from here; it only hands finished records
//! to a [`RecordSink`].

pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};

use crate::detect::{AnomalyEvent, Baseline};
use crate::recommend::Recommendation;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Destination for records produced by the pipeline.
pub trait RecordSink: Send + Sync {
    fn store_event(&self, event: &AnomalyEvent) -> Result<()>;

    /// Store recommendations, replacing earlier ones for the same incident and rule.
    fn store_recommendations(&self, recommendations: &[Recommendation]) -> Result<()>;
}

// Applied to every pooled connection.
const CONNECTION_PRAGMAS: &str = "\
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;";

/// Open the record database at `path`, creating it and its parent directory
/// if needed, and bring the schema up to date.
pub fn open_pool(path: &str) -> Result<Pool> {
    let parent = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(CONNECTION_PRAGMAS));
    let pool = R2D2Pool::builder()
        .max_size(4)
        .build(manager)
        .with_context(|| format!("failed to open record database {}", path))?;

    schema::migrate(&*pool.get()?).context("failed to migrate record database")?;
    Ok(pool)
}

/// [`RecordSink`] backed by a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Most recent anomaly events, newest observation first, optionally
    /// restricted to one plot.
    pub fn list_recent_events(&self, plot_id: Option<u64>, limit: usize) -> Result<Vec<AnomalyEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, plot_id, sensor_type, kind, direction, severity, confidence, value,
                    z_score, baseline_mean, baseline_stddev, baseline_samples, observed_at
             FROM anomaly_events
             WHERE ?1 IS NULL OR plot_id = ?1
             ORDER BY observed_at DESC, id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![plot_id.map(|p| p as i64), limit as i64], event_from_row)?;
        let events = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Most recent recommendations, optionally restricted to one plot.
    pub fn list_recommendations(&self, plot_id: Option<u64>, limit: usize) -> Result<Vec<Recommendation>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT incident_ref, plot_id, rule, action, explanation, confidence
             FROM recommendations
             WHERE ?1 IS NULL OR plot_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![plot_id.map(|p| p as i64), limit as i64], |row| {
            Ok(Recommendation {
                incident_ref: row.get(0)?,
                plot_id: row.get::<_, i64>(1)? as u64,
                rule: row.get(2)?,
                action: row.get(3)?,
                explanation: row.get(4)?,
                confidence: row.get(5)?,
            })
        })?;
        let recs = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(recs)
    }
}

impl RecordSink for SqliteStore {
    fn store_event(&self, event: &AnomalyEvent) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO anomaly_events (
                id, plot_id, sensor_type, kind, direction, severity, confidence, value,
                z_score, baseline_mean, baseline_stddev, baseline_samples, observed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event.id.to_string(),
                event.plot_id as i64,
                event.sensor_type.as_str(),
                event.kind.as_str(),
                event.direction.as_str(),
                event.severity.as_str(),
                event.confidence,
                event.triggering_value,
                event.z_score,
                event.baseline.mean,
                event.baseline.stddev,
                event.baseline.samples as i64,
                event.timestamp.to_rfc3339(),
            ],
        )
        .context("failed to save anomaly event")?;
        Ok(())
    }

    fn store_recommendations(&self, recommendations: &[Recommendation]) -> Result<()> {
        if recommendations.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO recommendations (incident_ref, plot_id, rule, action, explanation, confidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (incident_ref, rule) DO UPDATE SET
                    action = excluded.action,
                    explanation = excluded.explanation,
                    confidence = excluded.confidence,
                    created_at = datetime('now')",
            )?;
            for rec in recommendations {
                stmt.execute(params![
                    rec.incident_ref,
                    rec.plot_id as i64,
                    rec.rule,
                    rec.action,
                    rec.explanation,
                    rec.confidence,
                ])?;
            }
        }
        tx.commit().context("failed to save recommendations")?;
        Ok(())
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AnomalyEvent> {
    let observed: String = row.get(12)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&observed)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e)))?
        .with_timezone(&chrono::Utc);

    Ok(AnomalyEvent {
        id: parse_column(row, 0)?,
        plot_id: row.get::<_, i64>(1)? as u64,
        sensor_type: parse_column(row, 2)?,
        kind: parse_column(row, 3)?,
        direction: parse_column(row, 4)?,
        severity: parse_column(row, 5)?,
        confidence: row.get(6)?,
        triggering_value: row.get(7)?,
        z_score: row.get(8)?,
        baseline: Baseline {
            mean: row.get(9)?,
            stddev: row.get(10)?,
            samples: row.get::<_, i64>(11)? as usize,
        },
        timestamp,
    })
}
