//! Polling command dispatcher.
//!
//! Claims pending commands oldest-first on a fixed interval and drives
//! each to a terminal state. One bad command never takes the loop down:
//! handler errors, panicking handlers, and unrecognized command types all
//! converge to `Failed` with a message the front end can display.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vcheck_common::command::{Command, CommandType};
use vcheck_common::command_queue::CommandQueue;
use vcheck_common::service_status::ServiceStatusStore;

use crate::config::SharedConfig;
use crate::handlers::{self, HandlerContext};

pub struct Dispatcher {
    queue: CommandQueue,
    status: ServiceStatusStore,
    ctx: HandlerContext,
    config: SharedConfig,
}

impl Dispatcher {
    pub fn new(
        queue: CommandQueue,
        status: ServiceStatusStore,
        ctx: HandlerContext,
        config: SharedConfig,
    ) -> Self {
        Self {
            queue,
            status,
            ctx,
            config,
        }
    }

    /// Return commands stuck in `Processing` by a previous worker run to
    /// `Pending`. Runs once before the first cycle.
    pub fn recover(&self) -> Result<()> {
        let grace_secs = self.config.read().unwrap().reclaim_grace_secs;
        let reclaimed = self
            .queue
            .reclaim_stale(ChronoDuration::seconds(grace_secs as i64))?;
        if reclaimed > 0 {
            warn!(
                "Reclaimed {} command(s) left processing by a previous run",
                reclaimed
            );
        }
        Ok(())
    }

    /// Start the polling loop.
    ///
    /// The tick cadence skips while a cycle is still running: a slow
    /// batch delays the next poll rather than stacking cycles behind it.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let poll_secs = self.config.read().unwrap().poll_interval_secs;
            let mut ticker = interval(Duration::from_secs(poll_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Dispatcher polling every {}s", poll_secs);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Dispatcher stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!("Dispatch cycle failed: {:#}", e);
                        }
                    }
                }
            }
        })
    }

    /// One polling pass: claim a batch and process it sequentially.
    pub async fn run_cycle(&self) -> Result<usize> {
        let (batch_size, poll_secs) = {
            let cfg = self.config.read().unwrap();
            (cfg.dispatch_batch_size, cfg.poll_interval_secs)
        };
        let next_poll = Utc::now() + ChronoDuration::seconds(poll_secs as i64);

        let batch = self.queue.claim_batch(batch_size)?;
        if batch.is_empty() {
            let _ = self.status.update_activity(0, Some(next_poll));
            return Ok(0);
        }
        debug!("Claimed {} command(s)", batch.len());
        let _ = self
            .status
            .update_activity(batch.len() as i64, Some(next_poll));

        let processed = batch.len();
        for command in batch {
            self.process_one(command).await;
        }

        let _ = self.status.update_activity(0, Some(next_poll));
        Ok(processed)
    }

    async fn process_one(&self, command: Command) {
        let id = command.id.clone();
        let tag = command.command_type.clone();

        let outcome: Result<serde_json::Value, String> =
            match CommandType::parse(&command.command_type) {
                None => Err(format!("unsupported command type '{}'", tag)),
                Some(command_type) => {
                    // Run the handler in its own task so even a panic
                    // converges to a Failed row instead of killing the loop.
                    let ctx = self.ctx.clone();
                    let parameters = command.parameters.clone();
                    let handle = tokio::spawn(async move {
                        handlers::dispatch(&ctx, command_type, parameters).await
                    });
                    match handle.await {
                        Ok(Ok(result)) => Ok(result),
                        Ok(Err(e)) => Err(format!("{:#}", e)),
                        Err(e) => Err(format!("handler crashed: {}", e)),
                    }
                }
            };

        match outcome {
            Ok(result) => {
                info!("Command {} ({}) completed", id, tag);
                if let Err(e) = self.queue.complete(&id, result) {
                    error!("Failed to mark command {} completed: {:#}", id, e);
                }
            }
            Err(message) => {
                warn!("Command {} ({}) failed: {}", id, tag, message);
                if let Err(e) = self.queue.fail(&id, &message) {
                    error!("Failed to mark command {} failed: {:#}", id, e);
                }
            }
        }
    }
}
