//! Storage path-state classification and aggregation.
//!
//! The reusable core of every "how many redundant paths are in a bad
//! state" check: classify each path the backend reports, count per state
//! across all adapters, and compare the dead count against the definition's
//! threshold. Raw observations are never persisted; only the aggregate and
//! the per-path diagnosis lines fold into the check result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::checks::CheckStatus;
use crate::thresholds::{self, Evaluation};

/// Health classification of one redundant storage connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathState {
    Active,
    Dead,
    Standby,
    Disabled,
    Unknown,
}

impl PathState {
    /// Map a backend's raw status string onto the fixed vocabulary.
    ///
    /// Case-insensitive; anything unrecognized becomes `Unknown` so a new
    /// platform spelling shows up in the counts instead of vanishing.
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "dead" => Self::Dead,
            "standby" => Self::Standby,
            "disabled" => Self::Disabled,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dead => "dead",
            Self::Standby => "standby",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        }
    }
}

/// One path as reported by a backend for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathObservation {
    pub path_name: String,
    pub adapter_id: String,
    pub target_id: String,
    pub lun: u32,
    pub state: PathState,
}

impl PathObservation {
    pub fn new(adapter_id: &str, target_id: &str, lun: u32, state: PathState) -> Self {
        Self {
            path_name: format!("{}:{}:L{}", adapter_id, target_id, lun),
            adapter_id: adapter_id.to_string(),
            target_id: target_id.to_string(),
            lun,
            state,
        }
    }
}

/// Counts per state across all adapters of the monitored transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCounts {
    pub total: u64,
    pub active: u64,
    pub dead: u64,
    pub standby: u64,
    pub disabled: u64,
    pub unknown: u64,
    /// Distinct adapters seen. Zero means "nothing of this transport on
    /// the host": vacuously healthy, but worth flagging, since it can
    /// also mean the check is pointed at the wrong transport.
    pub adapter_count: u64,
}

/// Fold observations into per-state counts.
pub fn aggregate(observations: &[PathObservation]) -> PathCounts {
    let mut counts = PathCounts::default();
    let mut adapters: HashSet<&str> = HashSet::new();

    for obs in observations {
        counts.total += 1;
        adapters.insert(obs.adapter_id.as_str());
        match obs.state {
            PathState::Active => counts.active += 1,
            PathState::Dead => counts.dead += 1,
            PathState::Standby => counts.standby += 1,
            PathState::Disabled => counts.disabled += 1,
            PathState::Unknown => counts.unknown += 1,
        }
    }
    counts.adapter_count = adapters.len() as u64;
    counts
}

/// Per-path diagnosis lines for the result output:
/// `adapter:target:lun -> STATE`, one per line.
pub fn detail_lines(observations: &[PathObservation]) -> String {
    observations
        .iter()
        .map(|obs| {
            format!(
                "{}:{}:{} -> {}",
                obs.adapter_id,
                obs.target_id,
                obs.lun,
                obs.state.as_str().to_ascii_uppercase()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply the dead-path threshold: `Passed` exactly when
/// `dead <= max_dead_paths`.
pub fn evaluate(counts: &PathCounts, thresholds: &Value) -> Evaluation {
    let mut warnings = Vec::new();
    if counts.adapter_count == 0 {
        warnings.push("no adapters of the monitored transport were found".to_string());
    }

    match thresholds::parse_path_thresholds(thresholds) {
        Ok(t) => {
            if (counts.dead as i64) <= t.max_dead_paths {
                Evaluation {
                    status: CheckStatus::Passed,
                    summary: format!(
                        "{} of {} paths active, {} dead (maximum allowed {})",
                        counts.active, counts.total, counts.dead, t.max_dead_paths
                    ),
                    warnings,
                }
            } else {
                Evaluation {
                    status: CheckStatus::Failed,
                    summary: format!(
                        "{} dead path{} exceeds allowed maximum of {}",
                        counts.dead,
                        if counts.dead == 1 { "" } else { "s" },
                        t.max_dead_paths
                    ),
                    warnings,
                }
            }
        }
        Err(warning) => {
            warnings.push(warning);
            Evaluation {
                status: CheckStatus::Passed,
                summary: format!(
                    "{} of {} paths active, {} dead (no threshold applied)",
                    counts.active, counts.total, counts.dead
                ),
                warnings,
            }
        }
    }
}
