//! Terminal rendering helpers.

use chrono::Utc;
use owo_colors::OwoColorize;

use vcheck_common::command::{Command, CommandStatus};
use vcheck_common::command_queue::QueueCounts;
use vcheck_common::inventory::Target;
use vcheck_common::service_status::{Freshness, ServiceStatus};

pub fn print_service_status(status: Option<&ServiceStatus>, counts: &QueueCounts) {
    match status {
        None => {
            println!("{}", "Worker has never reported in.".red());
        }
        Some(status) => {
            let age = Utc::now() - status.last_heartbeat;
            let freshness = status.freshness(Utc::now());
            let band = match freshness {
                Freshness::Fresh => freshness.as_str().green().to_string(),
                Freshness::Aging => freshness.as_str().yellow().to_string(),
                Freshness::Stale => freshness.as_str().red().to_string(),
            };
            println!("Worker:    {} (v{})", status.status.bold(), status.version);
            println!(
                "Heartbeat: {}s ago ({})",
                age.num_seconds().max(0),
                band
            );
            println!("Active:    {} execution(s)", status.active_execution_count);
            if let Some(next) = status.next_scheduled_execution {
                println!("Next poll: {}", next.format("%H:%M:%S"));
            }
        }
    }
    println!(
        "Queue:     {} pending, {} processing, {} completed, {} failed",
        counts.pending, counts.processing, counts.completed, counts.failed
    );
}

pub fn print_command(command: &Command) {
    let status = match command.status {
        CommandStatus::Completed => command.status.as_str().green().to_string(),
        CommandStatus::Failed => command.status.as_str().red().to_string(),
        _ => command.status.as_str().yellow().to_string(),
    };
    println!("Command:   {}", command.id);
    println!("Type:      {}", command.command_type);
    println!("Status:    {}", status);
    println!("Created:   {}", command.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(processed) = command.processed_at {
        println!("Processed: {}", processed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(message) = &command.error_message {
        println!("Error:     {}", message.red());
    }
    if let Some(result) = &command.result {
        println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
    }
}

/// Render the payload of a completed `execute_check` command.
pub fn print_check_result(result: &serde_json::Value) {
    let status = result["status"].as_str().unwrap_or("unknown");
    let colored = match status {
        "passed" => status.green().to_string(),
        "failed" => status.red().to_string(),
        "skipped" => status.yellow().to_string(),
        _ => status.red().to_string(),
    };
    println!(
        "{} {} on {} ({} ms)",
        colored,
        result["check_definition_id"].as_str().unwrap_or("?"),
        result["host_id"].as_str().unwrap_or("?"),
        result["duration_ms"].as_u64().unwrap_or(0)
    );
    if let Some(message) = result["error_message"].as_str() {
        println!("  {}", message.red());
    }
    if let Some(output) = result["output"].as_str() {
        for line in output.lines() {
            println!("  {}", line);
        }
    }
}

/// Render the payload of a completed `execute_cluster_checks` command.
pub fn print_cluster_summary(result: &serde_json::Value) {
    println!(
        "Cluster {}: {} checks, {} passed, {} failed, {} errors, {} skipped",
        result["cluster_id"].as_str().unwrap_or("?"),
        result["total"],
        result["passed"].to_string().green(),
        result["failed"].to_string().red(),
        result["errors"].to_string().yellow(),
        result["skipped"],
    );
    if let Some(results) = result["results"].as_array() {
        for check in results {
            print_check_result(check);
        }
    }
}

pub fn print_targets(targets: &[Target]) {
    if targets.is_empty() {
        println!("No targets registered.");
        return;
    }
    for target in targets {
        let connected = match &target.last_connected {
            Some(at) => format!("last connected {}", at.format("%Y-%m-%d %H:%M")),
            None => "never connected".to_string(),
        };
        println!(
            "{}  {}  {} ({}, {})",
            target.id,
            target.name.bold(),
            target.url,
            target.backend_kind,
            connected
        );
    }
}
