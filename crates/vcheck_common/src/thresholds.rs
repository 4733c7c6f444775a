//! Threshold payload parsing and evaluation.
//!
//! Thresholds arrive as opaque JSON on the check definition. A malformed or
//! missing payload must not wedge a whole batch of checks, so evaluation
//! degrades to the most permissive verdict and records a warning instead of
//! failing the pipeline. That permissiveness silently defeats the check's
//! purpose when someone fat-fingers a definition, which is why the warning
//! always lands in the result details.

use serde::Deserialize;
use serde_json::Value;

use crate::checks::CheckStatus;

/// Outcome of applying thresholds to an aggregated payload.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub status: CheckStatus,
    pub summary: String,
    pub warnings: Vec<String>,
}

/// Threshold schema for the storage-path check family.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PathThresholds {
    pub max_dead_paths: i64,
}

/// Threshold schema for the scalar metric check family.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MetricThresholds {
    pub max_value: f64,
}

/// Parse storage-path thresholds, or explain why the permissive default
/// kicked in.
pub fn parse_path_thresholds(value: &Value) -> Result<PathThresholds, String> {
    if value.is_null() {
        return Err("no thresholds configured; defaulting to passed".to_string());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| format!("malformed thresholds ({}); defaulting to passed", e))
}

/// Parse metric thresholds, same permissive contract.
pub fn parse_metric_thresholds(value: &Value) -> Result<MetricThresholds, String> {
    if value.is_null() {
        return Err("no thresholds configured; defaulting to passed".to_string());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| format!("malformed thresholds ({}); defaulting to passed", e))
}

/// Compare a scalar against its upper bound.
pub fn evaluate_metric(name: &str, value: f64, thresholds: &Value) -> Evaluation {
    match parse_metric_thresholds(thresholds) {
        Ok(t) => {
            if value <= t.max_value {
                Evaluation {
                    status: CheckStatus::Passed,
                    summary: format!("{} = {} (maximum allowed {})", name, value, t.max_value),
                    warnings: Vec::new(),
                }
            } else {
                Evaluation {
                    status: CheckStatus::Failed,
                    summary: format!("{} = {} exceeds maximum of {}", name, value, t.max_value),
                    warnings: Vec::new(),
                }
            }
        }
        Err(warning) => Evaluation {
            status: CheckStatus::Passed,
            summary: format!("{} = {} (no threshold applied)", name, value),
            warnings: vec![warning],
        },
    }
}
