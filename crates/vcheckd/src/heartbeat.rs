//! Heartbeat publisher.
//!
//! Upserts the singleton service-status row on a fixed interval so any
//! observer can infer worker health without process access. A failed write
//! is logged and retried next tick; it is never fatal. Staleness policy
//! belongs entirely to readers.

use anyhow::Result;
use serde_json::json;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vcheck_common::check_store::CheckStore;
use vcheck_common::command_queue::CommandQueue;
use vcheck_common::service_status::ServiceStatusStore;

use crate::config::SharedConfig;

pub struct HeartbeatPublisher {
    status: ServiceStatusStore,
    queue: CommandQueue,
    checks: CheckStore,
    config: SharedConfig,
    started_at: Instant,
}

impl HeartbeatPublisher {
    pub fn new(
        status: ServiceStatusStore,
        queue: CommandQueue,
        checks: CheckStore,
        config: SharedConfig,
    ) -> Self {
        Self {
            status,
            queue,
            checks,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let beat_secs = self.config.read().unwrap().heartbeat_interval_secs;
            let mut ticker = interval(Duration::from_secs(beat_secs.max(1)));
            info!("Heartbeat every {}s", beat_secs);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        // Best-effort goodbye so readers see an orderly stop
                        // instead of a heartbeat that just goes quiet.
                        if let Err(e) = self.publish("Stopped") {
                            warn!("Final heartbeat failed: {:#}", e);
                        }
                        info!("Heartbeat stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.publish("Running") {
                            warn!("Heartbeat write failed: {:#}; retrying next tick", e);
                        }
                    }
                }
            }
        })
    }

    fn publish(&self, state: &str) -> Result<()> {
        let counts = self.queue.counts()?;
        let statistics = json!({
            "commands_pending": counts.pending,
            "commands_processing": counts.processing,
            "commands_completed": counts.completed,
            "commands_failed": counts.failed,
            "results_recorded": self.checks.result_count().unwrap_or(0),
            "uptime_secs": self.started_at.elapsed().as_secs(),
        });
        self.status
            .publish_heartbeat(state, env!("CARGO_PKG_VERSION"), &statistics)
    }
}
