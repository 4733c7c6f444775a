//! Managed endpoints, clusters, and hosts.
//!
//! Discovery itself belongs to the execution backends; this store holds
//! what the worker has learned so cluster-wide execution and the target
//! management commands have durable rows to operate on.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::checks::BackendKind;

/// Reachability of a host as last reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Maintenance,
    NotResponding,
    Unknown,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Maintenance => "maintenance",
            Self::NotResponding => "not_responding",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "maintenance" => Some(Self::Maintenance),
            "not_responding" => Some(Self::NotResponding),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A managed endpoint the worker connects to (vCenter or standalone host).
///
/// `credential_ref` is an opaque handle into the credential vault; this
/// core never sees plaintext secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub url: String,
    pub username: String,
    pub credential_ref: String,
    pub backend_kind: BackendKind,
    pub last_connected: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    pub cluster_id: Option<String>,
    /// The endpoint this host is managed through.
    pub target_id: Option<String>,
    pub connection_state: ConnectionState,
    pub is_enabled: bool,
}

#[derive(Clone)]
pub struct InventoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl InventoryStore {
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
            CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                username TEXT NOT NULL,
                credential_ref TEXT NOT NULL,
                backend_kind TEXT NOT NULL,
                last_connected TEXT
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                cluster_id TEXT,
                target_id TEXT,
                connection_state TEXT NOT NULL DEFAULT 'unknown',
                is_enabled INTEGER NOT NULL DEFAULT 1
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_hosts_cluster ON hosts(cluster_id)",
            [],
        )?;
        Ok(())
    }

    /// Add a target. Name uniqueness is the natural idempotency guard: a
    /// handler re-run after a crash fails here instead of inserting twice.
    pub fn add_target(
        &self,
        name: &str,
        url: &str,
        username: &str,
        credential_ref: &str,
        backend_kind: BackendKind,
    ) -> Result<Target> {
        let target = Target {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            username: username.to_string(),
            credential_ref: credential_ref.to_string(),
            backend_kind,
            last_connected: None,
        };
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO targets
                (id, name, url, username, credential_ref, backend_kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target.id,
                target.name,
                target.url,
                target.username,
                target.credential_ref,
                target.backend_kind.as_str()
            ],
        )?;
        if inserted == 0 {
            bail!("target '{}' already exists", name);
        }
        Ok(target)
    }

    pub fn get_target(&self, id: &str) -> Result<Option<Target>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, url, username, credential_ref, backend_kind, last_connected
                 FROM targets WHERE id = ?1",
                params![id],
                row_to_target,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_target_by_name(&self, name: &str) -> Result<Option<Target>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, url, username, credential_ref, backend_kind, last_connected
                 FROM targets WHERE name = ?1",
                params![name],
                row_to_target,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_targets(&self) -> Result<Vec<Target>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, url, username, credential_ref, backend_kind, last_connected
             FROM targets ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_target)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Update the given fields of a target; `None` leaves a field alone.
    pub fn edit_target(
        &self,
        id: &str,
        name: Option<&str>,
        url: Option<&str>,
        username: Option<&str>,
        credential_ref: Option<&str>,
    ) -> Result<Target> {
        let existing = self
            .get_target(id)?
            .with_context(|| format!("unknown target {}", id))?;

        let updated = Target {
            name: name.map(str::to_string).unwrap_or(existing.name),
            url: url.map(str::to_string).unwrap_or(existing.url),
            username: username.map(str::to_string).unwrap_or(existing.username),
            credential_ref: credential_ref
                .map(str::to_string)
                .unwrap_or(existing.credential_ref),
            ..existing
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE targets SET name = ?1, url = ?2, username = ?3, credential_ref = ?4
             WHERE id = ?5",
            params![
                updated.name,
                updated.url,
                updated.username,
                updated.credential_ref,
                id
            ],
        )
        .context("Failed to edit target")?;
        Ok(updated)
    }

    pub fn delete_target(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        if deleted == 0 {
            bail!("unknown target {}", id);
        }
        Ok(())
    }

    pub fn mark_target_connected(&self, id: &str) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE targets SET last_connected = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn add_cluster(&self, name: &str) -> Result<Cluster> {
        let cluster = Cluster {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO clusters (id, name) VALUES (?1, ?2)",
            params![cluster.id, cluster.name],
        )?;
        if inserted == 0 {
            bail!("cluster '{}' already exists", name);
        }
        Ok(cluster)
    }

    pub fn get_cluster(&self, id: &str) -> Result<Option<Cluster>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name FROM clusters WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Cluster {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Insert or refresh a host row (discovery feeds this).
    pub fn upsert_host(&self, host: &Host) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO hosts (id, name, cluster_id, target_id, connection_state, is_enabled)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                cluster_id = excluded.cluster_id,
                target_id = excluded.target_id,
                connection_state = excluded.connection_state,
                is_enabled = excluded.is_enabled
            "#,
            params![
                host.id,
                host.name,
                host.cluster_id,
                host.target_id,
                host.connection_state.as_str(),
                host.is_enabled
            ],
        )
        .context("Failed to upsert host")?;
        Ok(())
    }

    pub fn get_host(&self, id: &str) -> Result<Option<Host>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, name, cluster_id, target_id, connection_state, is_enabled
                 FROM hosts WHERE id = ?1",
                params![id],
                row_to_host,
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_host_connection_state(&self, id: &str, state: ConnectionState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE hosts SET connection_state = ?1 WHERE id = ?2",
            params![state.as_str(), id],
        )?;
        Ok(())
    }

    /// Enabled hosts under a cluster, the population for cluster-wide
    /// check execution.
    pub fn enabled_hosts_in_cluster(&self, cluster_id: &str) -> Result<Vec<Host>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, cluster_id, target_id, connection_state, is_enabled
             FROM hosts WHERE cluster_id = ?1 AND is_enabled = 1
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![cluster_id], row_to_host)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<Target> {
    let backend: String = row.get(5)?;
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        username: row.get(3)?,
        credential_ref: row.get(4)?,
        backend_kind: BackendKind::parse(&backend).unwrap_or(BackendKind::ObjectModel),
        last_connected: row.get(6)?,
    })
}

fn row_to_host(row: &Row<'_>) -> rusqlite::Result<Host> {
    let state: String = row.get(4)?;
    Ok(Host {
        id: row.get(0)?,
        name: row.get(1)?,
        cluster_id: row.get(2)?,
        target_id: row.get(3)?,
        connection_state: ConnectionState::parse(&state).unwrap_or(ConnectionState::Unknown),
        is_enabled: row.get(5)?,
    })
}
