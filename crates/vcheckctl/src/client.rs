//! Queue client: submit commands and poll them to a terminal state.
//!
//! The front end never claims or mutates rows: it inserts, then reads the
//! same row by id until the worker resolves it. While waiting it
//! cross-checks the heartbeat so "worker is down" surfaces as a clear
//! error instead of an endless spinner.

use anyhow::{bail, Result};
use chrono::Utc;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

use vcheck_common::command::{Command, CommandType};
use vcheck_common::command_queue::{CommandQueue, QueueCounts, QueueRole};
use vcheck_common::service_status::{Freshness, ServiceStatus, ServiceStatusStore};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct CommandClient {
    queue: CommandQueue,
    status: ServiceStatusStore,
}

impl CommandClient {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            queue: CommandQueue::open(db_path, QueueRole::Frontend)?,
            status: ServiceStatusStore::open(db_path)?,
        })
    }

    /// Insert a command and return its id immediately.
    pub fn submit(&self, command_type: CommandType, parameters: serde_json::Value) -> Result<String> {
        let id = self.queue.enqueue(command_type, parameters)?;
        debug!("Submitted {} as {}", command_type, id);
        Ok(id)
    }

    /// Poll a command until the worker resolves it.
    pub async fn wait(&self, command_id: &str, wait_for: Duration) -> Result<Command> {
        let started = Instant::now();
        loop {
            let Some(command) = self.queue.get(command_id)? else {
                bail!("command {} not found", command_id);
            };
            if command.status.is_terminal() {
                return Ok(command);
            }

            // A stale heartbeat means nobody will ever resolve this row;
            // fail fast instead of burning the full wait budget.
            if let Some(hint) = self.worker_down_hint()? {
                bail!("command {} is still {}; {}", command_id, command.status, hint);
            }
            if started.elapsed() >= wait_for {
                bail!(
                    "command {} did not finish within {}s (status: {})",
                    command_id,
                    wait_for.as_secs(),
                    command.status
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Submit and wait in one step.
    pub async fn run(
        &self,
        command_type: CommandType,
        parameters: serde_json::Value,
        wait_for: Duration,
    ) -> Result<Command> {
        let id = self.submit(command_type, parameters)?;
        self.wait(&id, wait_for).await
    }

    pub fn get(&self, command_id: &str) -> Result<Option<Command>> {
        self.queue.get(command_id)
    }

    pub fn service_status(&self) -> Result<Option<ServiceStatus>> {
        self.status.get()
    }

    pub fn queue_counts(&self) -> Result<QueueCounts> {
        self.queue.counts()
    }

    /// `Some(reason)` when the heartbeat says the worker is gone.
    fn worker_down_hint(&self) -> Result<Option<String>> {
        let Some(status) = self.status.get()? else {
            return Ok(Some(
                "the worker has never published a heartbeat; is vcheckd installed?".to_string(),
            ));
        };
        let age = Utc::now() - status.last_heartbeat;
        if status.freshness(Utc::now()) == Freshness::Stale {
            return Ok(Some(format!(
                "the worker appears down (last heartbeat {} minutes ago)",
                age.num_minutes()
            )));
        }
        Ok(None)
    }
}
