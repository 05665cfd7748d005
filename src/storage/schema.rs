//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS anomaly_events (
            id TEXT PRIMARY KEY,
            plot_id INTEGER NOT NULL,
            sensor_type TEXT NOT NULL,
            kind TEXT NOT NULL,
            direction TEXT NOT NULL,
            severity TEXT NOT NULL,
            confidence REAL NOT NULL,
            value REAL NOT NULL,
            z_score REAL,
            baseline_mean REAL NOT NULL,
            baseline_stddev REAL NOT NULL,
            baseline_samples INTEGER NOT NULL,
            observed_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS recommendations (
            id INTEGER PRIMARY KEY,
            incident_ref TEXT NOT NULL,
            plot_id INTEGER NOT NULL,
            rule TEXT NOT NULL,
            action TEXT NOT NULL,
            explanation TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (incident_ref, rule)
        );

        CREATE INDEX IF NOT EXISTS idx_anomaly_events_plot ON anomaly_events(plot_id, observed_at);
        CREATE INDEX IF NOT EXISTS idx_recommendations_incident ON recommendations(incident_ref);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
