//! syncq Sync - Queueing, commit and recovery engine
//!
//! Provides:
//! - Validated, coalesced enqueueing of uploads and deletions
//! - Single-flight atomic batch commits with an auto-commit timer
//! - A persisted mode state machine with automatic recovery
//! - Remote change checks (downloads and remote deletions)
//!
//! ## Modules
//!
//! - [`engine`] - The [`SyncEngine`](engine::SyncEngine) handle
//! - [`queue`] - Change validation, coalescing and batch building
//! - [`mode`] - Persisted mode tracking
//! - [`scheduler`] - Single-shot auto-commit timer
//! - [`network`] - Connectivity state and reconnect listener
//! - [`retry`] - Bounded exponential backoff
//! - [`remote`] - Planning of remote index entries
//! - [`staging`] - Durable staging of in-memory payloads

pub mod engine;
pub mod mode;
pub mod network;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod staging;

use thiserror::Error;

use syncq_core::domain::{ClientApiError, EngineMode};

pub use engine::{CommitOutcome, EngineSettings, MetadataResetScope, SyncEngine, SyncOutcome};
pub use network::WatchNetworkState;

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The caller violated a precondition of the public interface
    #[error("Client API error: {0}")]
    ClientApi(#[from] ClientApiError),

    /// The engine is in an error mode and needs `reset_from_error`
    #[error("Engine is in error mode: {0}")]
    ErrorMode(EngineMode),

    /// `reset_from_error` was called outside an error mode
    #[error("Engine is not in an error mode")]
    NotInErrorMode,

    /// A batch or remote check is in flight
    #[error("Engine is busy with a batch or remote check")]
    Busy,

    /// Server-side cleanup failed during `reset_from_error`
    #[error("Server reset failed: {0}")]
    ResetFailed(String),

    /// Store failure or another defect inside the engine
    #[error("Internal error: {0}")]
    Internal(String),
}
