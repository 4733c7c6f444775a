//! Command-line surface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vcheckctl", version, about = "vSphere health check control")]
pub struct Cli {
    /// Shared database path (defaults to the system location).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Seconds to wait for the worker to finish a command.
    #[arg(long, global = true, default_value_t = 120)]
    pub wait_secs: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show worker liveness and queue depths.
    Status,
    /// Run checks.
    #[command(subcommand)]
    Check(CheckCommands),
    /// Manage connection targets.
    #[command(subcommand)]
    Target(TargetCommands),
    /// Read and write configuration entries.
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Inspect a previously submitted command.
    Command {
        /// Command id returned at submit time.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CheckCommands {
    /// Run one check against one host.
    Run {
        #[arg(long)]
        host: String,
        #[arg(long)]
        check: String,
    },
    /// Run every enabled check against every enabled host of a cluster.
    Cluster {
        #[arg(long)]
        cluster: String,
    },
}

#[derive(Subcommand)]
pub enum TargetCommands {
    /// Register a new target.
    Add {
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        credential_ref: String,
    },
    /// List registered targets.
    List,
    /// Connect to a target and record the success.
    Connect { id: String },
    /// Probe a target without recording anything.
    Test { id: String },
    /// Update fields of a target.
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        credential_ref: Option<String>,
    },
    /// Remove a target.
    Delete { id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Read one entry.
    Get { category: String, key: String },
    /// Upsert one entry. The value is parsed as JSON, falling back to a
    /// plain string.
    Set {
        category: String,
        key: String,
        value: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        requires_restart: bool,
    },
    /// List a category.
    List { category: String },
}
