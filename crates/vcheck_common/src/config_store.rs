//! Key/category-scoped configuration store.
//!
//! Readable and writable from both processes. Entries that only take
//! effect after a worker restart carry `requires_restart`, so the front
//! end can tell the operator instead of pretending the change applied.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One configuration row, keyed by (key, category).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub category: String,
    pub value: serde_json::Value,
    pub description: String,
    pub requires_restart: bool,
    pub last_modified: DateTime<Utc>,
    pub modified_by: String,
}

#[derive(Clone)]
pub struct ConfigStore {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigStore {
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
            CREATE TABLE IF NOT EXISTS configuration (
                key TEXT NOT NULL,
                category TEXT NOT NULL,
                value TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                requires_restart INTEGER NOT NULL DEFAULT 0,
                last_modified TEXT NOT NULL,
                modified_by TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (key, category)
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Upsert one entry, stamping `last_modified`.
    pub fn set(
        &self,
        category: &str,
        key: &str,
        value: serde_json::Value,
        description: &str,
        requires_restart: bool,
        modified_by: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO configuration
                (key, category, value, description, requires_restart, last_modified, modified_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(key, category) DO UPDATE SET
                value = excluded.value,
                description = excluded.description,
                requires_restart = excluded.requires_restart,
                last_modified = excluded.last_modified,
                modified_by = excluded.modified_by
            "#,
            params![
                key,
                category,
                value.to_string(),
                description,
                requires_restart,
                now,
                modified_by
            ],
        )
        .context("Failed to set configuration entry")?;
        Ok(())
    }

    pub fn get(&self, category: &str, key: &str) -> Result<Option<ConfigEntry>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT key, category, value, description, requires_restart,
                        last_modified, modified_by
                 FROM configuration WHERE category = ?1 AND key = ?2",
                params![category, key],
                row_to_entry,
            )
            .optional()
            .context("Failed to read configuration entry")?;
        Ok(row)
    }

    pub fn list_category(&self, category: &str) -> Result<Vec<ConfigEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, category, value, description, requires_restart,
                    last_modified, modified_by
             FROM configuration WHERE category = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![category], row_to_entry)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<ConfigEntry> {
    let value: String = row.get(2)?;
    Ok(ConfigEntry {
        key: row.get(0)?,
        category: row.get(1)?,
        value: serde_json::from_str(&value).unwrap_or(serde_json::Value::Null),
        description: row.get(3)?,
        requires_restart: row.get(4)?,
        last_modified: row.get(5)?,
        modified_by: row.get(6)?,
    })
}
