//! vcheck interactive front end.
//!
//! Everything that needs the privileged worker goes through the shared
//! command queue; this process only inserts rows and polls them back.

mod cli;
mod client;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

use vcheck_common::command::CommandType;
use vcheck_common::config_store::ConfigStore;
use vcheck_common::inventory::InventoryStore;

use cli::{CheckCommands, Cli, Commands, ConfigCommands, TargetCommands};
use client::CommandClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(vcheck_common::DEFAULT_DB_PATH));
    let wait_for = Duration::from_secs(cli.wait_secs);

    let client = CommandClient::open(&db_path)
        .with_context(|| format!("Failed to open {:?}", db_path))?;

    match cli.command {
        Commands::Status => {
            let status = client.service_status()?;
            let counts = client.queue_counts()?;
            output::print_service_status(status.as_ref(), &counts);
        }

        Commands::Check(CheckCommands::Run { host, check }) => {
            let command = client
                .run(
                    CommandType::ExecuteCheck,
                    json!({ "host_id": host, "check_definition_id": check }),
                    wait_for,
                )
                .await?;
            match &command.result {
                Some(result) => output::print_check_result(result),
                None => output::print_command(&command),
            }
        }

        Commands::Check(CheckCommands::Cluster { cluster }) => {
            let command = client
                .run(
                    CommandType::ExecuteClusterChecks,
                    json!({ "cluster_id": cluster }),
                    wait_for,
                )
                .await?;
            match &command.result {
                Some(result) => output::print_cluster_summary(result),
                None => output::print_command(&command),
            }
        }

        Commands::Target(TargetCommands::Add {
            name,
            url,
            username,
            credential_ref,
        }) => {
            let command = client
                .run(
                    CommandType::AddTarget,
                    json!({
                        "name": name,
                        "url": url,
                        "username": username,
                        "credential_ref": credential_ref,
                    }),
                    wait_for,
                )
                .await?;
            output::print_command(&command);
        }

        Commands::Target(TargetCommands::List) => {
            let inventory = InventoryStore::open(&db_path)?;
            output::print_targets(&inventory.list_targets()?);
        }

        Commands::Target(TargetCommands::Connect { id }) => {
            let command = client
                .run(CommandType::ConnectTarget, json!({ "target_id": id }), wait_for)
                .await?;
            output::print_command(&command);
        }

        Commands::Target(TargetCommands::Test { id }) => {
            let command = client
                .run(
                    CommandType::TestTargetConnection,
                    json!({ "target_id": id }),
                    wait_for,
                )
                .await?;
            output::print_command(&command);
        }

        Commands::Target(TargetCommands::Edit {
            id,
            name,
            url,
            username,
            credential_ref,
        }) => {
            let command = client
                .run(
                    CommandType::EditTarget,
                    json!({
                        "target_id": id,
                        "name": name,
                        "url": url,
                        "username": username,
                        "credential_ref": credential_ref,
                    }),
                    wait_for,
                )
                .await?;
            output::print_command(&command);
        }

        Commands::Target(TargetCommands::Delete { id }) => {
            let command = client
                .run(CommandType::DeleteTarget, json!({ "target_id": id }), wait_for)
                .await?;
            output::print_command(&command);
        }

        Commands::Config(ConfigCommands::Get { category, key }) => {
            let store = ConfigStore::open(&db_path)?;
            match store.get(&category, &key)? {
                Some(entry) => {
                    println!("{}", serde_json::to_string_pretty(&entry)?);
                }
                None => println!("No entry for {}/{}", category, key),
            }
        }

        Commands::Config(ConfigCommands::Set {
            category,
            key,
            value,
            description,
            requires_restart,
        }) => {
            let store = ConfigStore::open(&db_path)?;
            let value = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value));
            let user = std::env::var("USER").unwrap_or_else(|_| "vcheckctl".to_string());
            store.set(&category, &key, value, &description, requires_restart, &user)?;
            if requires_restart {
                println!("Saved. Takes effect after the worker restarts.");
            } else {
                println!("Saved. The worker picks it up on the next reload.");
            }
        }

        Commands::Config(ConfigCommands::List { category }) => {
            let store = ConfigStore::open(&db_path)?;
            for entry in store.list_category(&category)? {
                println!(
                    "{}/{} = {}{}",
                    entry.category,
                    entry.key,
                    entry.value,
                    if entry.requires_restart {
                        " (requires restart)"
                    } else {
                        ""
                    }
                );
            }
        }

        Commands::Command { id } => match client.get(&id)? {
            Some(command) => output::print_command(&command),
            None => println!("No command with id {}", id),
        },
    }

    Ok(())
}
