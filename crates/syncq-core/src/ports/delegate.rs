//! Delegate port (engine → application)
//!
//! This module defines the callbacks through which the engine reports
//! completed transfers, recovery progress and errors to the owning
//! application. The delegate never influences engine decisions.
//!
//! ## Design Notes
//!
//! - Callbacks are plain synchronous methods; they are invoked from the
//!   engine's single worker task, one at a time, in a fixed order: per-item
//!   notifications of a batch first, then the aggregate notification.
//! - Implementations must return quickly. Heavy work belongs on a task of
//!   the application's own.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, EngineMode, ItemId, SyncAttributes};

// ============================================================================
// RecoveryStage
// ============================================================================

/// Step of an automatic recovery, reported through `on_recovery_progress`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum RecoveryStage {
    /// The previous process stopped while synchronizing; resuming
    ResumingAfterRestart,
    /// Connectivity came back; resuming queued work
    NetworkReconnected,
    /// A transient failure is being retried after a delay
    Retrying {
        operation: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// Server-side cleanup during `reset_from_error`
    ResettingServer { attempt: u32 },
}

impl std::fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStage::ResumingAfterRestart => write!(f, "resuming after restart"),
            RecoveryStage::NetworkReconnected => write!(f, "network reconnected"),
            RecoveryStage::Retrying {
                operation,
                attempt,
                delay_ms,
            } => write!(f, "retrying {} (attempt {}, in {}ms)", operation, attempt, delay_ms),
            RecoveryStage::ResettingServer { attempt } => {
                write!(f, "resetting server (attempt {})", attempt)
            }
        }
    }
}

// ============================================================================
// ISyncDelegate trait
// ============================================================================

/// Port trait for engine notifications
pub trait ISyncDelegate: Send + Sync {
    /// A file from the server was downloaded to `local_file`
    fn on_single_download_complete(&self, local_file: &Path, attrs: &SyncAttributes);

    /// Every download of the current check has completed
    fn on_all_downloads_complete(&self);

    /// The server reported that another device deleted the item
    fn on_deletion_received(&self, item_id: ItemId);

    /// A batch finished; `operation_count` items were applied
    fn on_commit_complete(&self, operation_count: usize);

    /// One upload of a batch was applied on the server
    fn on_single_upload_complete(&self, item_id: ItemId);

    /// Deletions of a batch were applied on the server
    fn on_deletions_sent(&self, item_ids: &[ItemId]);

    /// An automatic recovery step is taking place
    fn on_recovery_progress(&self, stage: &RecoveryStage);

    /// The engine entered an error mode
    fn on_error(&self, error: &EngineError);

    /// The engine mode changed
    fn on_mode_change(&self, _mode: &EngineMode) {}
}
