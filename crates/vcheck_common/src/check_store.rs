//! Durable check catalog and append-only result history.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::checks::{
    BackendKind, CheckDefinition, CheckKind, CheckResult, CheckStatus, Severity,
};

/// Store for check definitions and their execution history.
///
/// Results are append-only: one row per attempt, never updated, so trend
/// analysis is always a scan ordered by `executed_at`.
#[derive(Clone)]
pub struct CheckStore {
    conn: Arc<Mutex<Connection>>,
}

impl CheckStore {
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
            CREATE TABLE IF NOT EXISTS check_definitions (
                id TEXT PRIMARY KEY,
                category_id TEXT NOT NULL,
                name TEXT NOT NULL,
                backend_kind TEXT NOT NULL,
                kind TEXT NOT NULL,
                default_severity TEXT NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                parameters TEXT NOT NULL DEFAULT '{}',
                thresholds TEXT NOT NULL DEFAULT 'null',
                UNIQUE(category_id, name)
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS check_results (
                id TEXT PRIMARY KEY,
                check_definition_id TEXT NOT NULL,
                host_id TEXT NOT NULL,
                status TEXT NOT NULL,
                output TEXT NOT NULL DEFAULT '',
                details TEXT NOT NULL DEFAULT '{}',
                error_message TEXT,
                executed_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_results_host_check
             ON check_results(host_id, check_definition_id, executed_at)",
            [],
        )?;
        Ok(())
    }

    /// Insert a new definition. The (category, name) pair is unique, which
    /// is also what makes re-running a crashed catalog import safe.
    pub fn insert_definition(&self, def: &CheckDefinition) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO check_definitions
                (id, category_id, name, backend_kind, kind, default_severity,
                 timeout_seconds, is_enabled, parameters, thresholds)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                def.id,
                def.category_id,
                def.name,
                def.backend_kind.as_str(),
                def.kind.as_str(),
                def.default_severity.as_str(),
                def.timeout_seconds as i64,
                def.is_enabled,
                def.parameters.to_string(),
                def.thresholds.to_string(),
            ],
        )?;
        if inserted == 0 {
            bail!(
                "check '{}' already exists in category '{}'",
                def.name,
                def.category_id
            );
        }
        Ok(())
    }

    pub fn get_definition(&self, id: &str) -> Result<Option<CheckDefinition>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, category_id, name, backend_kind, kind, default_severity,
                        timeout_seconds, is_enabled, parameters, thresholds
                 FROM check_definitions WHERE id = ?1",
                params![id],
                row_to_definition,
            )
            .optional()
            .context("Failed to read check definition")?;
        Ok(row)
    }

    pub fn list_enabled_definitions(&self) -> Result<Vec<CheckDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, category_id, name, backend_kind, kind, default_severity,
                    timeout_seconds, is_enabled, parameters, thresholds
             FROM check_definitions WHERE is_enabled = 1
             ORDER BY category_id, name",
        )?;
        let rows = stmt.query_map([], row_to_definition)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Append one execution attempt. Results are never updated in place.
    pub fn record_result(&self, result: &CheckResult) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO check_results
                (id, check_definition_id, host_id, status, output, details,
                 error_message, executed_at, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                result.id,
                result.check_definition_id,
                result.host_id,
                result.status.as_str(),
                result.output,
                result.details,
                result.error_message,
                result.executed_at,
                result.duration_ms as i64,
            ],
        )
        .context("Failed to record check result")?;
        Ok(())
    }

    /// Full history for one (host, check) pair, oldest first.
    pub fn results_for(
        &self,
        host_id: &str,
        check_definition_id: &str,
    ) -> Result<Vec<CheckResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, check_definition_id, host_id, status, output, details,
                    error_message, executed_at, duration_ms
             FROM check_results
             WHERE host_id = ?1 AND check_definition_id = ?2
             ORDER BY executed_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![host_id, check_definition_id], row_to_result)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Most recent attempt for one (host, check) pair.
    pub fn latest_result(
        &self,
        host_id: &str,
        check_definition_id: &str,
    ) -> Result<Option<CheckResult>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, check_definition_id, host_id, status, output, details,
                        error_message, executed_at, duration_ms
                 FROM check_results
                 WHERE host_id = ?1 AND check_definition_id = ?2
                 ORDER BY executed_at DESC, rowid DESC LIMIT 1",
                params![host_id, check_definition_id],
                row_to_result,
            )
            .optional()?;
        Ok(row)
    }

    /// Total recorded results, for heartbeat statistics.
    pub fn result_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM check_results", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn row_to_definition(row: &Row<'_>) -> rusqlite::Result<CheckDefinition> {
    let backend: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let severity: String = row.get(5)?;
    let parameters: String = row.get(8)?;
    let thresholds: String = row.get(9)?;
    Ok(CheckDefinition {
        id: row.get(0)?,
        category_id: row.get(1)?,
        name: row.get(2)?,
        backend_kind: BackendKind::parse(&backend).unwrap_or(BackendKind::Simulated),
        kind: CheckKind::parse(&kind).unwrap_or(CheckKind::Metric),
        default_severity: Severity::parse(&severity).unwrap_or(Severity::Warning),
        timeout_seconds: row.get::<_, i64>(6)? as u64,
        is_enabled: row.get(7)?,
        parameters: serde_json::from_str(&parameters).unwrap_or(serde_json::Value::Null),
        thresholds: serde_json::from_str(&thresholds).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<CheckResult> {
    let status: String = row.get(3)?;
    Ok(CheckResult {
        id: row.get(0)?,
        check_definition_id: row.get(1)?,
        host_id: row.get(2)?,
        status: CheckStatus::parse(&status).unwrap_or(CheckStatus::Error),
        output: row.get(4)?,
        details: row.get(5)?,
        error_message: row.get(6)?,
        executed_at: row.get(7)?,
        duration_ms: row.get::<_, i64>(8)? as u64,
    })
}
