//! SQLite-backed command queue.
//!
//! The queue is a durable mailbox shared by two processes. The front end
//! only ever inserts rows and reads them back by id; the worker claims
//! pending rows in creation order and writes their terminal state. Which
//! side a handle is on is declared at construction with [`QueueRole`];
//! both roles open the same file, the role only gates the mutating calls.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::command::{Command, CommandStatus, CommandType};

/// Which side of the process boundary this handle lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    /// The privileged worker: may claim and resolve commands.
    Worker,
    /// The interactive front end: insert and poll only.
    Frontend,
}

/// Row counts per lifecycle state, for heartbeat statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable, ordered command mailbox.
#[derive(Clone)]
pub struct CommandQueue {
    conn: Arc<Mutex<Connection>>,
    role: QueueRole,
}

impl CommandQueue {
    /// Open or create the queue inside the shared database.
    pub fn open(path: &Path, role: QueueRole) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let queue = Self {
            conn: Arc::new(Mutex::new(conn)),
            role,
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS commands (
                id TEXT PRIMARY KEY,
                command_type TEXT NOT NULL,
                parameters TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                processed_at TEXT,
                result TEXT,
                error_message TEXT
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_commands_status_created
             ON commands(status, created_at)",
            [],
        )?;
        Ok(())
    }

    /// Insert a new `Pending` command and return its id. Never waits on
    /// processing; safe to call concurrently from any number of writers.
    pub fn enqueue(
        &self,
        command_type: CommandType,
        parameters: serde_json::Value,
    ) -> Result<String> {
        self.enqueue_raw(command_type.as_str(), parameters)
    }

    /// Insert a command with an arbitrary type tag.
    ///
    /// Exists so newer front ends can talk to older workers (and vice
    /// versa): an unrecognized tag still lands in the queue and comes back
    /// as an explicit failure instead of a client-side error.
    pub fn enqueue_raw(&self, command_type: &str, parameters: serde_json::Value) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO commands (id, command_type, parameters, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![id, command_type, parameters.to_string(), now],
        )
        .context("Failed to enqueue command")?;
        Ok(id)
    }

    /// Look a command up by id. Unknown ids are `None`, not an error.
    pub fn get(&self, id: &str) -> Result<Option<Command>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, command_type, parameters, status, created_at,
                        processed_at, result, error_message
                 FROM commands WHERE id = ?1",
                params![id],
                row_to_command,
            )
            .optional()
            .context("Failed to read command")?;
        Ok(row)
    }

    /// Claim up to `limit` of the oldest pending commands, marking each
    /// `Processing` and stamping `processed_at`. Worker only.
    pub fn claim_batch(&self, limit: usize) -> Result<Vec<Command>> {
        self.require_worker("claim_batch")?;
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();

        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM commands WHERE status = 'pending'
                 ORDER BY created_at ASC, rowid ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            // The status guard keeps a concurrently restarted worker from
            // double-claiming the same row.
            let changed = conn.execute(
                "UPDATE commands SET status = 'processing', processed_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )?;
            if changed == 1 {
                let cmd = conn.query_row(
                    "SELECT id, command_type, parameters, status, created_at,
                            processed_at, result, error_message
                     FROM commands WHERE id = ?1",
                    params![id],
                    row_to_command,
                )?;
                claimed.push(cmd);
            }
        }
        Ok(claimed)
    }

    /// Resolve a processing command as `Completed` with a result payload.
    pub fn complete(&self, id: &str, result: serde_json::Value) -> Result<()> {
        self.require_worker("complete")?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE commands SET status = 'completed', result = ?1
             WHERE id = ?2 AND status = 'processing'",
            params![result.to_string(), id],
        )?;
        if changed != 1 {
            bail!("command {} is not in processing state", id);
        }
        Ok(())
    }

    /// Resolve a processing command as `Failed` with a human-readable
    /// message.
    pub fn fail(&self, id: &str, error_message: &str) -> Result<()> {
        self.require_worker("fail")?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE commands SET status = 'failed', error_message = ?1
             WHERE id = ?2 AND status = 'processing'",
            params![error_message, id],
        )?;
        if changed != 1 {
            bail!("command {} is not in processing state", id);
        }
        Ok(())
    }

    /// Return commands stuck in `Processing` longer than `grace` to
    /// `Pending`.
    ///
    /// A worker crash between claiming a row and writing its terminal state
    /// would otherwise park it forever. Handlers are required to tolerate a
    /// re-run, so the startup reclaim gives at-least-once delivery.
    pub fn reclaim_stale(&self, grace: Duration) -> Result<usize> {
        self.require_worker("reclaim_stale")?;
        let cutoff: DateTime<Utc> = Utc::now() - grace;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE commands SET status = 'pending', processed_at = NULL
             WHERE status = 'processing' AND processed_at < ?1",
            params![cutoff],
        )?;
        Ok(changed)
    }

    /// Row counts per state.
    pub fn counts(&self) -> Result<QueueCounts> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM commands GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (status, n) = row?;
            let n = n as u64;
            match status.as_str() {
                "pending" => counts.pending = n,
                "processing" => counts.processing = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    fn require_worker(&self, op: &str) -> Result<()> {
        if self.role != QueueRole::Worker {
            bail!("{} is a worker-only operation", op);
        }
        Ok(())
    }
}

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<Command> {
    let id: String = row.get(0)?;
    let parameters: String = row.get(2)?;
    let status: String = row.get(3)?;
    let result: Option<String> = row.get(6)?;
    let status = CommandStatus::parse(&status).unwrap_or_else(|| {
        tracing::warn!("Command {} has unreadable status '{}'", id, status);
        CommandStatus::Failed
    });
    Ok(Command {
        id,
        command_type: row.get(1)?,
        parameters: serde_json::from_str(&parameters).unwrap_or(serde_json::Value::Null),
        status,
        created_at: row.get(4)?,
        processed_at: row.get(5)?,
        result: result.map(|r| serde_json::from_str(&r).unwrap_or(serde_json::Value::Null)),
        error_message: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_pair(dir: &tempfile::TempDir) -> (CommandQueue, CommandQueue) {
        let path = dir.path().join("vcheck.db");
        let worker = CommandQueue::open(&path, QueueRole::Worker).unwrap();
        let frontend = CommandQueue::open(&path, QueueRole::Frontend).unwrap();
        (worker, frontend)
    }

    #[test]
    fn test_enqueue_and_get() {
        let dir = tempdir().unwrap();
        let (_, frontend) = open_pair(&dir);

        let id = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();
        let cmd = frontend.get(&id).unwrap().unwrap();

        assert_eq!(cmd.status, CommandStatus::Pending);
        assert_eq!(cmd.command_type, "get_service_status");
        assert!(cmd.processed_at.is_none());
        assert!(cmd.result.is_none());
    }

    #[test]
    fn test_get_unknown_id_is_none() {
        let dir = tempdir().unwrap();
        let (_, frontend) = open_pair(&dir);
        assert!(frontend.get("no-such-id").unwrap().is_none());
    }

    #[test]
    fn test_claim_is_fifo() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                frontend
                    .enqueue(CommandType::GetServiceStatus, json!({ "seq": i }))
                    .unwrap(),
            );
        }

        let claimed = worker.claim_batch(10).unwrap();
        let claimed_ids: Vec<_> = claimed.iter().map(|c| c.id.clone()).collect();
        assert_eq!(claimed_ids, ids);
        assert!(claimed.iter().all(|c| c.status == CommandStatus::Processing));
        assert!(claimed.iter().all(|c| c.processed_at.is_some()));
    }

    #[test]
    fn test_claim_respects_batch_limit() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        for _ in 0..15 {
            frontend
                .enqueue(CommandType::GetServiceStatus, json!({}))
                .unwrap();
        }

        assert_eq!(worker.claim_batch(10).unwrap().len(), 10);
        assert_eq!(worker.claim_batch(10).unwrap().len(), 5);
        assert_eq!(worker.claim_batch(10).unwrap().len(), 0);
    }

    #[test]
    fn test_complete_and_fail_lifecycle() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        let ok = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();
        let bad = frontend.enqueue_raw("no_such_command", json!({})).unwrap();

        worker.claim_batch(10).unwrap();
        worker.complete(&ok, json!({ "status": "ok" })).unwrap();
        worker.fail(&bad, "unsupported command type").unwrap();

        let ok_row = frontend.get(&ok).unwrap().unwrap();
        assert_eq!(ok_row.status, CommandStatus::Completed);
        assert_eq!(ok_row.result.unwrap()["status"], "ok");

        let bad_row = frontend.get(&bad).unwrap().unwrap();
        assert_eq!(bad_row.status, CommandStatus::Failed);
        assert_eq!(
            bad_row.error_message.as_deref(),
            Some("unsupported command type")
        );
    }

    #[test]
    fn test_terminal_rows_are_immutable() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        let id = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();
        worker.claim_batch(1).unwrap();
        worker.complete(&id, json!({})).unwrap();

        // No transition out of a terminal state.
        assert!(worker.fail(&id, "nope").is_err());
        assert!(worker.complete(&id, json!({})).is_err());

        // Pending rows cannot jump straight to terminal either.
        let fresh = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();
        assert!(worker.complete(&fresh, json!({})).is_err());
    }

    #[test]
    fn test_poll_after_terminal_is_idempotent() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        let id = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();
        worker.claim_batch(1).unwrap();
        worker.complete(&id, json!({ "n": 42 })).unwrap();

        let first = frontend.get(&id).unwrap().unwrap();
        let second = frontend.get(&id).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_frontend_cannot_mutate() {
        let dir = tempdir().unwrap();
        let (_, frontend) = open_pair(&dir);

        let id = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();

        assert!(frontend.claim_batch(1).is_err());
        assert!(frontend.complete(&id, json!({})).is_err());
        assert!(frontend.fail(&id, "x").is_err());
        assert!(frontend.reclaim_stale(Duration::seconds(0)).is_err());
    }

    #[test]
    fn test_reclaim_stale_returns_rows_to_pending() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        let id = frontend
            .enqueue(CommandType::GetServiceStatus, json!({}))
            .unwrap();
        worker.claim_batch(1).unwrap();

        // Grace of zero: anything claimed in the past is stale.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let reclaimed = worker.reclaim_stale(Duration::zero()).unwrap();
        assert_eq!(reclaimed, 1);

        let cmd = frontend.get(&id).unwrap().unwrap();
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert!(cmd.processed_at.is_none());

        // A generous grace leaves fresh claims alone.
        worker.claim_batch(1).unwrap();
        assert_eq!(worker.reclaim_stale(Duration::minutes(5)).unwrap(), 0);
    }

    #[test]
    fn test_counts() {
        let dir = tempdir().unwrap();
        let (worker, frontend) = open_pair(&dir);

        for _ in 0..3 {
            frontend
                .enqueue(CommandType::GetServiceStatus, json!({}))
                .unwrap();
        }
        let claimed = worker.claim_batch(2).unwrap();
        worker.complete(&claimed[0].id, json!({})).unwrap();

        let counts = worker.counts().unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 0);
    }
}
