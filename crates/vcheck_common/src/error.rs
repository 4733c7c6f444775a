//! Typed errors for execution backends.
//!
//! The taxonomy matters to callers: a capability gap (`NotSupported`) lets
//! the execution service fall back to another backend, while transport and
//! authentication failures surface as an `Error` check verdict without any
//! retry at this layer.

use thiserror::Error;

/// Errors an execution backend may return from `connect` or `run_check`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The target did not answer at the network level.
    #[error("target unreachable: {0}")]
    Transport(String),

    /// The target answered but rejected the supplied credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The backend cannot run this kind of check at all.
    #[error("not supported by backend: {0}")]
    NotSupported(String),

    /// The call did not finish within the declared timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The caller withdrew the request.
    #[error("cancelled")]
    Cancelled,

    /// The backend answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    /// True when the error means "pick another backend", not "the check ran
    /// into trouble".
    pub fn is_capability_gap(&self) -> bool {
        matches!(self, BackendError::NotSupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_gap_classification() {
        assert!(BackendError::NotSupported("paths".into()).is_capability_gap());
        assert!(!BackendError::Transport("refused".into()).is_capability_gap());
        assert!(!BackendError::Timeout(30).is_capability_gap());
    }

    #[test]
    fn test_error_messages() {
        let e = BackendError::Timeout(30);
        assert_eq!(e.to_string(), "timed out after 30s");

        let e = BackendError::Cancelled;
        assert_eq!(e.to_string(), "cancelled");
    }
}
