//! Command handlers: one function per command type.
//!
//! The `dispatch` match is the routing table, the single source of truth
//! for what the worker understands. Handlers return a JSON payload on
//! success; any error becomes the command's `Failed` outcome with the
//! message preserved for the front end.
//!
//! Handlers must tolerate a re-run: after a crash mid-processing the row
//! is reclaimed and claimed again, so anything not idempotent by nature
//! (like `add_target`) relies on a uniqueness check in the data model to
//! reject the second attempt.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vcheck_common::check_store::CheckStore;
use vcheck_common::command::{
    AddTargetParams, CommandType, DeleteTargetParams, EditTargetParams, ExecuteCheckParams,
    ExecuteClusterChecksParams, TargetRefParams, TestCredentialsParams, ValidateBackendParams,
};
use vcheck_common::command_queue::CommandQueue;
use vcheck_common::config_store::ConfigStore;
use vcheck_common::checks::{BackendKind, CheckStatus};
use vcheck_common::inventory::{InventoryStore, Target};
use vcheck_common::service_status::ServiceStatusStore;

use crate::backends::{BackendRegistry, Credentials};
use crate::check_service::CheckExecutionService;
use crate::config::SharedConfig;

/// Everything a handler may need, cloned per command.
#[derive(Clone)]
pub struct HandlerContext {
    pub queue: CommandQueue,
    pub status: ServiceStatusStore,
    pub inventory: InventoryStore,
    pub checks: CheckStore,
    pub config_store: ConfigStore,
    pub config: SharedConfig,
    pub registry: Arc<BackendRegistry>,
    pub service: CheckExecutionService,
    /// Worker shutdown signal, threaded into check execution.
    pub shutdown: CancellationToken,
}

/// Route one parsed command to its handler.
pub async fn dispatch(
    ctx: &HandlerContext,
    command_type: CommandType,
    parameters: Value,
) -> Result<Value> {
    match command_type {
        CommandType::ExecuteCheck => execute_check(ctx, parameters).await,
        CommandType::ExecuteClusterChecks => execute_cluster_checks(ctx, parameters).await,
        CommandType::ValidateBackendAvailability => validate_backend(ctx, parameters),
        CommandType::GetServiceStatus => get_service_status(ctx),
        CommandType::ReloadConfiguration => reload_configuration(ctx),
        CommandType::ConnectTarget => connect_target(ctx, parameters).await,
        CommandType::TestTargetConnection => test_target_connection(ctx, parameters).await,
        CommandType::TestTargetConnectionWithCredentials => {
            test_target_credentials(ctx, parameters).await
        }
        CommandType::AddTarget => add_target(ctx, parameters),
        CommandType::EditTarget => edit_target(ctx, parameters),
        CommandType::DeleteTarget => delete_target(ctx, parameters),
    }
}

fn parse<T: serde::de::DeserializeOwned>(parameters: Value) -> Result<T> {
    serde_json::from_value(parameters).context("invalid parameters")
}

async fn execute_check(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: ExecuteCheckParams = parse(parameters)?;
    let result = ctx
        .service
        .execute_check(&params.host_id, &params.check_definition_id, &ctx.shutdown)
        .await;
    info!(
        "Check {} on host {}: {}",
        params.check_definition_id, params.host_id, result.status
    );
    Ok(serde_json::to_value(result)?)
}

async fn execute_cluster_checks(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: ExecuteClusterChecksParams = parse(parameters)?;
    if ctx.inventory.get_cluster(&params.cluster_id)?.is_none() {
        bail!("unknown cluster {}", params.cluster_id);
    }

    let results = ctx
        .service
        .execute_cluster_checks(&params.cluster_id, &ctx.shutdown)
        .await;

    let count = |status: CheckStatus| results.iter().filter(|r| r.status == status).count();
    Ok(json!({
        "cluster_id": params.cluster_id,
        "total": results.len(),
        "passed": count(CheckStatus::Passed),
        "failed": count(CheckStatus::Failed),
        "errors": count(CheckStatus::Error),
        "skipped": count(CheckStatus::Skipped),
        "results": results,
    }))
}

fn validate_backend(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: ValidateBackendParams = parse(parameters)?;
    match ctx.registry.resolve(params.backend_kind) {
        Some(resolved) => Ok(json!({
            "backend_kind": params.backend_kind,
            "available": true,
            "resolved_kind": resolved.backend.kind(),
            "authority": resolved.authority,
        })),
        None => Ok(json!({
            "backend_kind": params.backend_kind,
            "available": false,
        })),
    }
}

fn get_service_status(ctx: &HandlerContext) -> Result<Value> {
    let status = ctx.status.get()?;
    let counts = ctx.queue.counts()?;
    Ok(json!({
        "service": status,
        "queue": {
            "pending": counts.pending,
            "processing": counts.processing,
            "completed": counts.completed,
            "failed": counts.failed,
        },
    }))
}

fn reload_configuration(ctx: &HandlerContext) -> Result<Value> {
    let report = {
        let mut config = ctx.config.write().unwrap();
        config.apply_overlay(&ctx.config_store, false)?
    };
    info!(
        "Configuration reloaded: {} applied, {} deferred",
        report.applied.len(),
        report.requires_restart.len()
    );
    Ok(serde_json::to_value(report)?)
}

/// Connect once through the target's declared backend and record the
/// success. Sessions are never cached; this is a reachability assertion,
/// not a pool warm-up.
async fn connect_once(ctx: &HandlerContext, target: &Target) -> Result<()> {
    let resolved = ctx
        .registry
        .resolve(target.backend_kind)
        .with_context(|| format!("no execution backend available for '{}'", target.backend_kind))?;
    let credentials = Credentials::for_target(target);
    let session = resolved
        .backend
        .connect(target, &credentials)
        .await
        .with_context(|| format!("failed to connect to {}", target.url))?;
    resolved.backend.disconnect(session).await;
    Ok(())
}

async fn connect_target(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: TargetRefParams = parse(parameters)?;
    let target = ctx
        .inventory
        .get_target(&params.target_id)?
        .with_context(|| format!("unknown target {}", params.target_id))?;

    connect_once(ctx, &target).await?;
    ctx.inventory.mark_target_connected(&target.id)?;
    info!("Connected to target '{}'", target.name);
    Ok(json!({ "target_id": target.id, "connected": true }))
}

async fn test_target_connection(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: TargetRefParams = parse(parameters)?;
    let target = ctx
        .inventory
        .get_target(&params.target_id)?
        .with_context(|| format!("unknown target {}", params.target_id))?;

    connect_once(ctx, &target).await?;
    Ok(json!({ "target_id": target.id, "reachable": true }))
}

async fn test_target_credentials(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: TestCredentialsParams = parse(parameters)?;
    // Ephemeral target: nothing here touches the inventory.
    let target = Target {
        id: String::new(),
        name: String::new(),
        url: params.url.clone(),
        username: params.username,
        credential_ref: params.credential_ref,
        backend_kind: params.backend_kind.unwrap_or(BackendKind::ObjectModel),
        last_connected: None,
    };
    connect_once(ctx, &target).await?;
    Ok(json!({ "url": params.url, "reachable": true }))
}

fn add_target(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: AddTargetParams = parse(parameters)?;
    let target = ctx.inventory.add_target(
        &params.name,
        &params.url,
        &params.username,
        &params.credential_ref,
        params.backend_kind.unwrap_or(BackendKind::ObjectModel),
    )?;
    info!("Added target '{}'", target.name);
    Ok(serde_json::to_value(target)?)
}

fn edit_target(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: EditTargetParams = parse(parameters)?;
    let target = ctx.inventory.edit_target(
        &params.target_id,
        params.name.as_deref(),
        params.url.as_deref(),
        params.username.as_deref(),
        params.credential_ref.as_deref(),
    )?;
    info!("Edited target '{}'", target.name);
    Ok(serde_json::to_value(target)?)
}

fn delete_target(ctx: &HandlerContext, parameters: Value) -> Result<Value> {
    let params: DeleteTargetParams = parse(parameters)?;
    ctx.inventory.delete_target(&params.target_id)?;
    info!("Deleted target {}", params.target_id);
    Ok(json!({ "target_id": params.target_id, "deleted": true }))
}
