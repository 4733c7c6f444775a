//! Execution backend contract and registry.
//!
//! A backend is a capability behind three operations: connect to a managed
//! endpoint, run one check against one host, disconnect. The registry maps
//! each declared backend kind to an implementation and an optional
//! fallback, and every resolution carries a [`DataAuthority`] tag so a
//! caller can branch on how trustworthy the data is instead of
//! string-matching log messages.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use vcheck_common::checks::{BackendKind, CheckDefinition};
use vcheck_common::error::BackendError;
use vcheck_common::inventory::{Host, Target};
use vcheck_common::paths::PathObservation;

pub use simulated::{SimulatedBackend, SimulatedBackendBuilder};

/// How much to trust a result, decided at backend resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataAuthority {
    /// Produced by the backend the check definition declares.
    Authoritative,
    /// Produced by the registered fallback for that backend.
    Fallback,
    /// Produced by the simulated backend standing in for a real one.
    Simulated,
}

impl DataAuthority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authoritative => "authoritative",
            Self::Fallback => "fallback",
            Self::Simulated => "simulated",
        }
    }
}

/// Connection material for a target. The credential reference is resolved
/// to a secret by the backend itself; this layer never holds plaintext.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub credential_ref: String,
}

impl Credentials {
    pub fn for_target(target: &Target) -> Self {
        Self {
            username: target.username.clone(),
            credential_ref: target.credential_ref.clone(),
        }
    }
}

/// Explicit session handle returned by `connect` and threaded through
/// every call. Lifetime is scoped to one operation; there is no ambient
/// session cache anywhere.
#[derive(Debug, Clone)]
pub struct BackendSession {
    pub id: String,
    pub backend: BackendKind,
    pub target_url: String,
}

impl BackendSession {
    pub fn new(backend: BackendKind, target_url: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            backend,
            target_url: target_url.to_string(),
        }
    }
}

/// Raw payload a backend produces for one check invocation, before any
/// threshold is applied.
#[derive(Debug, Clone)]
pub enum CheckPayload {
    StoragePaths(Vec<PathObservation>),
    Metric { name: String, value: f64 },
}

/// The uniform contract every execution backend implements.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Capability probe. An unavailable backend makes resolution fall
    /// through to the registered fallback.
    fn is_available(&self) -> bool {
        true
    }

    async fn connect(
        &self,
        target: &Target,
        credentials: &Credentials,
    ) -> Result<BackendSession, BackendError>;

    async fn run_check(
        &self,
        session: &BackendSession,
        host: &Host,
        definition: &CheckDefinition,
    ) -> Result<CheckPayload, BackendError>;

    async fn disconnect(&self, session: BackendSession);
}

/// A backend picked for one execution, with its authority tag.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub backend: Arc<dyn ExecutionBackend>,
    pub authority: DataAuthority,
}

/// Capability-indexed backend lookup.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendKind, Arc<dyn ExecutionBackend>>,
    fallbacks: HashMap<BackendKind, BackendKind>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn ExecutionBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    /// Declare which backend stands in when `primary` is unavailable.
    pub fn register_fallback(&mut self, primary: BackendKind, fallback: BackendKind) {
        self.fallbacks.insert(primary, fallback);
    }

    pub fn registered_kinds(&self) -> Vec<BackendKind> {
        self.backends.keys().copied().collect()
    }

    /// Resolve the backend for a declared kind.
    ///
    /// The authority tag is `Authoritative` only when the declared backend
    /// itself answers; a stand-in is tagged `Fallback`, or `Simulated`
    /// when the stand-in is the simulated backend.
    pub fn resolve(&self, declared: BackendKind) -> Option<ResolvedBackend> {
        if let Some(backend) = self.backends.get(&declared) {
            if backend.is_available() {
                return Some(ResolvedBackend {
                    backend: backend.clone(),
                    authority: DataAuthority::Authoritative,
                });
            }
        }

        let fallback_kind = *self.fallbacks.get(&declared)?;
        let backend = self.backends.get(&fallback_kind)?;
        if !backend.is_available() {
            return None;
        }
        let authority = if fallback_kind == BackendKind::Simulated {
            DataAuthority::Simulated
        } else {
            DataAuthority::Fallback
        };
        Some(ResolvedBackend {
            backend: backend.clone(),
            authority,
        })
    }
}
