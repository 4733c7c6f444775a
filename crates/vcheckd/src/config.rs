//! Worker configuration: TOML file plus database overlay.
//!
//! The file covers everything with defaults, so a missing file is a normal
//! first boot. Entries in the configuration store's `daemon` category
//! overlay the file; `reload_configuration` re-applies the overlay at
//! runtime and reports which keys need a restart instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use vcheck_common::config_store::ConfigStore;

/// Runtime settings of the worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Shared database both processes open.
    pub db_path: PathBuf,
    /// Seconds between dispatch cycles.
    pub poll_interval_secs: u64,
    /// Maximum pending commands claimed per cycle.
    pub dispatch_batch_size: usize,
    /// Seconds between heartbeat writes.
    pub heartbeat_interval_secs: u64,
    /// Age after which a Processing row from a dead worker is reclaimed.
    pub reclaim_grace_secs: u64,
    /// Cluster-wide cap on hosts checked concurrently.
    pub max_concurrent_hosts: usize,
    /// Cap on concurrent checks against one host.
    pub max_checks_per_host: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(vcheck_common::DEFAULT_DB_PATH),
            poll_interval_secs: 5,
            dispatch_batch_size: 10,
            heartbeat_interval_secs: 10,
            reclaim_grace_secs: 300,
            max_concurrent_hosts: 5,
            max_checks_per_host: 3,
        }
    }
}

/// Handle shared between the loops and the reload handler.
pub type SharedConfig = Arc<RwLock<DaemonConfig>>;

/// What a configuration reload did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadReport {
    /// Keys whose new values are in effect now.
    pub applied: Vec<String>,
    /// Keys that changed in the store but only apply after a restart.
    pub requires_restart: Vec<String>,
}

impl DaemonConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Overlay settings from the store's `daemon` category onto `self`.
    ///
    /// Batch size, reclaim grace, and the concurrency caps take effect on
    /// the next cycle. Timer intervals are captured when the loops start,
    /// so at runtime (`at_boot = false`) a change to those is reported,
    /// not applied.
    pub fn apply_overlay(&mut self, store: &ConfigStore, at_boot: bool) -> Result<ReloadReport> {
        let mut report = ReloadReport::default();

        for entry in store.list_category("daemon")? {
            let Some(value) = entry.value.as_u64() else {
                warn!(
                    "Ignoring daemon config '{}': expected a number, got {}",
                    entry.key, entry.value
                );
                continue;
            };
            match entry.key.as_str() {
                "dispatch_batch_size" => {
                    self.dispatch_batch_size = value as usize;
                    report.applied.push(entry.key);
                }
                "reclaim_grace_secs" => {
                    self.reclaim_grace_secs = value;
                    report.applied.push(entry.key);
                }
                "max_concurrent_hosts" => {
                    self.max_concurrent_hosts = value as usize;
                    report.applied.push(entry.key);
                }
                "max_checks_per_host" => {
                    self.max_checks_per_host = value as usize;
                    report.applied.push(entry.key);
                }
                "poll_interval_secs" => {
                    if at_boot {
                        self.poll_interval_secs = value;
                        report.applied.push(entry.key);
                    } else if self.poll_interval_secs != value {
                        report.requires_restart.push(entry.key);
                    }
                }
                "heartbeat_interval_secs" => {
                    if at_boot {
                        self.heartbeat_interval_secs = value;
                        report.applied.push(entry.key);
                    } else if self.heartbeat_interval_secs != value {
                        report.requires_restart.push(entry.key);
                    }
                }
                other => {
                    warn!("Unknown daemon config key '{}'", other);
                }
            }
        }
        Ok(report)
    }
}
