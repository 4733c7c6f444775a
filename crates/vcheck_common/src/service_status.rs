//! Worker liveness record and its store.
//!
//! The heartbeat publisher owns the singleton row. Everyone else reads it
//! and applies their own staleness policy; the publisher deliberately has
//! no opinion on what "too old" means.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Singleton liveness + activity record written by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Free-text state name, e.g. "Running".
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub version: String,
    pub active_execution_count: i64,
    pub next_scheduled_execution: Option<DateTime<Utc>>,
    /// Opaque statistics payload (queue depths, uptime, ...).
    pub statistics: serde_json::Value,
}

impl ServiceStatus {
    /// Read-side freshness classification of this record.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        Freshness::classify(now - self.last_heartbeat)
    }
}

/// Read-side freshness bands for the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Heartbeat under five minutes old.
    Fresh,
    /// Between five and sixty minutes; the worker may be wedged.
    Aging,
    /// Over an hour; the worker is almost certainly down.
    Stale,
}

impl Freshness {
    pub fn classify(age: Duration) -> Self {
        if age < Duration::minutes(5) {
            Self::Fresh
        } else if age <= Duration::minutes(60) {
            Self::Aging
        } else {
            Self::Stale
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Aging => "aging",
            Self::Stale => "stale",
        }
    }
}

/// Store for the singleton [`ServiceStatus`] row.
#[derive(Clone)]
pub struct ServiceStatusStore {
    conn: Arc<Mutex<Connection>>,
}

impl ServiceStatusStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS service_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                status TEXT NOT NULL,
                last_heartbeat TEXT NOT NULL,
                version TEXT NOT NULL,
                active_execution_count INTEGER NOT NULL DEFAULT 0,
                next_scheduled_execution TEXT,
                statistics TEXT NOT NULL DEFAULT '{}'
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Upsert the heartbeat fields. Heartbeat publisher only.
    pub fn publish_heartbeat(
        &self,
        status: &str,
        version: &str,
        statistics: &serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO service_status (id, status, last_heartbeat, version, statistics)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat,
                version = excluded.version,
                statistics = excluded.statistics
            "#,
            params![status, now, version, statistics.to_string()],
        )
        .context("Failed to publish heartbeat")?;
        Ok(())
    }

    /// Dispatcher side channel: activity counters only, never the
    /// heartbeat timestamp. A no-op until the first heartbeat lands.
    pub fn update_activity(
        &self,
        active_execution_count: i64,
        next_scheduled_execution: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE service_status
             SET active_execution_count = ?1, next_scheduled_execution = ?2
             WHERE id = 1",
            params![active_execution_count, next_scheduled_execution],
        )
        .context("Failed to update activity")?;
        Ok(())
    }

    pub fn get(&self) -> Result<Option<ServiceStatus>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT status, last_heartbeat, version, active_execution_count,
                        next_scheduled_execution, statistics
                 FROM service_status WHERE id = 1",
                [],
                |row| {
                    let statistics: String = row.get(5)?;
                    Ok(ServiceStatus {
                        status: row.get(0)?,
                        last_heartbeat: row.get(1)?,
                        version: row.get(2)?,
                        active_execution_count: row.get(3)?,
                        next_scheduled_execution: row.get(4)?,
                        statistics: serde_json::from_str(&statistics)
                            .unwrap_or(serde_json::Value::Null),
                    })
                },
            )
            .optional()
            .context("Failed to read service status")?;
        Ok(row)
    }
}
