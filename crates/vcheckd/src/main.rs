//! vcheck worker daemon entry point.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vcheck_common::check_store::CheckStore;
use vcheck_common::checks::BackendKind;
use vcheck_common::command_queue::{CommandQueue, QueueRole};
use vcheck_common::config_store::ConfigStore;
use vcheck_common::inventory::InventoryStore;
use vcheck_common::service_status::ServiceStatusStore;

use vcheckd::backends::{BackendRegistry, SimulatedBackendBuilder};
use vcheckd::check_service::CheckExecutionService;
use vcheckd::config::DaemonConfig;
use vcheckd::dispatcher::Dispatcher;
use vcheckd::handlers::HandlerContext;
use vcheckd::heartbeat::HeartbeatPublisher;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("[BOOT] vcheckd v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("VCHECKD_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(vcheck_common::DEFAULT_CONFIG_PATH));
    let mut config = DaemonConfig::load(&config_path)?;

    let db_path = config.db_path.clone();
    let queue = CommandQueue::open(&db_path, QueueRole::Worker)
        .context("Failed to open command queue")?;
    let status = ServiceStatusStore::open(&db_path).context("Failed to open status store")?;
    let checks = CheckStore::open(&db_path).context("Failed to open check store")?;
    let inventory = InventoryStore::open(&db_path).context("Failed to open inventory store")?;
    let config_store = ConfigStore::open(&db_path).context("Failed to open config store")?;
    info!("[BOOT] Stores ready ({:?})", db_path);

    // Pick up any settings the front end changed while we were down.
    config.apply_overlay(&config_store, true)?;
    let config = config.into_shared();

    // Concrete platform clients (script, REST, SDK) register here when
    // compiled in; the simulated backend answers as the declared fallback
    // so a missing client degrades instead of failing outright.
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(SimulatedBackendBuilder::new().build()));
    registry.register_fallback(BackendKind::Script, BackendKind::Simulated);
    registry.register_fallback(BackendKind::RestApi, BackendKind::Simulated);
    registry.register_fallback(BackendKind::ObjectModel, BackendKind::Simulated);
    let registry = Arc::new(registry);
    info!("[BOOT] {} backend(s) registered", registry.registered_kinds().len());

    let service =
        CheckExecutionService::new(registry.clone(), inventory.clone(), checks.clone(), &config);

    let cancel = CancellationToken::new();
    let ctx = HandlerContext {
        queue: queue.clone(),
        status: status.clone(),
        inventory,
        checks: checks.clone(),
        config_store,
        config: config.clone(),
        registry,
        service,
        shutdown: cancel.clone(),
    };

    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        status.clone(),
        ctx,
        config.clone(),
    ));
    dispatcher.recover().context("Failed to reclaim stale commands")?;

    let heartbeat = HeartbeatPublisher::new(status, queue, checks, config);
    let heartbeat_handle = heartbeat.spawn(cancel.clone());
    let dispatcher_handle = dispatcher.spawn(cancel.clone());

    info!("[READY] vcheckd operational");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel.cancel();

    let _ = dispatcher_handle.await;
    let _ = heartbeat_handle.await;
    info!("vcheckd stopped");
    Ok(())
}
