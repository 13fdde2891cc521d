//! Engine operating mode
//!
//! [`EngineMode`] is the externally observable state of the engine. It is
//! persisted on every transition as a tagged JSON record:
//!
//! ```text
//! {"kind": "idle"}
//! {"kind": "non_recoverable_error", "error": {"message": "...", ...}}
//! ```
//!
//! `error` is present only for the three error kinds. Decoding a record with
//! an unknown `kind` fails; it never falls back to `Idle`.
//!
//! ## Transitions
//!
//! ```text
//!   Idle ──commit──► Synchronizing ──success──► Idle
//!                        │    ▲
//!              offline   ▼    │ reconnect
//!                  NetworkNotConnected
//!
//!   any ──► ClientApiError | NonRecoverableError | InternalError
//!   error ──reset_from_error──► Idle
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::errors::{ClientApiError, DomainError};

/// Structured payload of a non-client error mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Human-readable description
    pub message: String,
    /// Operation that failed, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Number of attempts made before giving up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            operation: None,
            attempts: None,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.operation, self.attempts) {
            (Some(op), Some(n)) => write!(f, "{} ({} after {} attempts)", self.message, op, n),
            (Some(op), None) => write!(f, "{} ({})", self.message, op),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Operating condition of the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum EngineMode {
    /// Nothing in flight
    #[default]
    Idle,
    /// A batch or remote check is in progress
    Synchronizing,
    /// Work is waiting for connectivity
    NetworkNotConnected,
    /// The application misused the public interface
    ClientApiError(ClientApiError),
    /// The remote rejected an operation or retries were exhausted
    NonRecoverableError(ErrorDetail),
    /// Defect inside the engine
    InternalError(ErrorDetail),
}

impl EngineMode {
    /// Returns true for the three error modes
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EngineMode::ClientApiError(_)
                | EngineMode::NonRecoverableError(_)
                | EngineMode::InternalError(_)
        )
    }

    /// Stable name of the mode, matching the persisted `kind`
    pub fn name(&self) -> &'static str {
        match self {
            EngineMode::Idle => "idle",
            EngineMode::Synchronizing => "synchronizing",
            EngineMode::NetworkNotConnected => "network_not_connected",
            EngineMode::ClientApiError(_) => "client_api_error",
            EngineMode::NonRecoverableError(_) => "non_recoverable_error",
            EngineMode::InternalError(_) => "internal_error",
        }
    }

    /// Encodes the mode as its persisted record
    pub fn encode(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(|e| DomainError::InvalidModeRecord(e.to_string()))
    }

    /// Decodes a persisted record, rejecting unknown kinds
    pub fn decode(record: &str) -> Result<Self, DomainError> {
        serde_json::from_str(record).map_err(|e| DomainError::InvalidModeRecord(e.to_string()))
    }
}

/// An error reported to the application, one per error mode
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("client API error: {0}")]
    ClientApi(ClientApiError),
    #[error("non-recoverable error: {0}")]
    NonRecoverable(ErrorDetail),
    #[error("internal error: {0}")]
    Internal(ErrorDetail),
}

impl EngineError {
    /// The error mode this error puts the engine in
    pub fn mode(&self) -> EngineMode {
        match self {
            EngineError::ClientApi(e) => EngineMode::ClientApiError(e.clone()),
            EngineError::NonRecoverable(d) => EngineMode::NonRecoverableError(d.clone()),
            EngineError::Internal(d) => EngineMode::InternalError(d.clone()),
        }
    }
}

impl EngineMode {
    /// The error carried by an error mode
    pub fn error(&self) -> Option<EngineError> {
        match self {
            EngineMode::ClientApiError(e) => Some(EngineError::ClientApi(e.clone())),
            EngineMode::NonRecoverableError(d) => Some(EngineError::NonRecoverable(d.clone())),
            EngineMode::InternalError(d) => Some(EngineError::Internal(d.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::ClientApiError(e) => write!(f, "client API error: {}", e),
            EngineMode::NonRecoverableError(e) => write!(f, "non-recoverable error: {}", e),
            EngineMode::InternalError(e) => write!(f, "internal error: {}", e),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_modes() -> Vec<EngineMode> {
        vec![
            EngineMode::Idle,
            EngineMode::Synchronizing,
            EngineMode::NetworkNotConnected,
            EngineMode::ClientApiError(ClientApiError::DifferentRemoteFileName {
                item_id: "u1".into(),
                stored: "a.txt".into(),
                given: "b.txt".into(),
            }),
            EngineMode::NonRecoverableError(
                ErrorDetail::new("server rejected batch")
                    .with_operation("submit_batch")
                    .with_attempts(3),
            ),
            EngineMode::InternalError(ErrorDetail::new("store corrupted")),
        ]
    }

    #[test]
    fn test_every_mode_round_trips() {
        for mode in all_modes() {
            let record = mode.encode().unwrap();
            let decoded = EngineMode::decode(&record).unwrap();
            assert_eq!(decoded, mode, "record: {record}");
        }
    }

    #[test]
    fn test_error_payload_only_for_error_kinds() {
        for mode in all_modes() {
            let value: serde_json::Value = serde_json::from_str(&mode.encode().unwrap()).unwrap();
            assert_eq!(value["kind"], mode.name());
            assert_eq!(value.get("error").is_some(), mode.is_error());
        }
    }

    #[test]
    fn test_unknown_kind_fails_decode() {
        let result = EngineMode::decode(r#"{"kind":"resting"}"#);
        assert!(matches!(result, Err(DomainError::InvalidModeRecord(_))));
    }

    #[test]
    fn test_error_kind_without_payload_fails_decode() {
        let result = EngineMode::decode(r#"{"kind":"internal_error"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_is_idle() {
        assert_eq!(EngineMode::default(), EngineMode::Idle);
        assert!(!EngineMode::Idle.is_error());
    }

    #[test]
    fn test_error_and_mode_correspond() {
        for mode in all_modes() {
            match mode.error() {
                Some(err) => assert_eq!(err.mode(), mode),
                None => assert!(!mode.is_error()),
            }
        }
    }

    #[test]
    fn test_display() {
        let mode = EngineMode::InternalError(ErrorDetail::new("boom").with_operation("save"));
        assert_eq!(mode.to_string(), "internal error: boom (save)");
        assert_eq!(EngineMode::Synchronizing.to_string(), "synchronizing");
    }
}
