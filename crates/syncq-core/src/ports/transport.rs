//! Transport port (driven/secondary port)
//!
//! This module defines the interface to the layer that actually moves bytes
//! to and from the cloud-storage service. The engine never speaks HTTP itself;
//! it hands a [`CommitBatch`] to an [`ITransport`] and reacts to the outcome.
//!
//! ## Design Notes
//!
//! - Errors are classified with [`TransportError`] so the engine can decide
//!   between backoff, waiting for the network, and giving up.
//! - The transport is expected to handle lock contention on the server itself;
//!   what reaches the engine as `Transient` is whatever is still failing.
//! - The batch and outcome structs are port-level DTOs, not domain entities.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ChangeId, ItemId, SyncAttributes};

// ============================================================================
// TransportError
// ============================================================================

/// Failure reported by the transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Lock contention, timeouts, 5xx responses: worth retrying
    #[error("Transient transport error: {0}")]
    Transient(String),

    /// The device lost connectivity during the operation
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The server refused the operation; retrying will not help
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// Anything else, e.g. a payload that could not be read
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Returns true if the operation may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

// ============================================================================
// CommitBatch
// ============================================================================

/// What to do with one item in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchOperation {
    /// Upload the payload as the item's new content
    Upload { payload: PathBuf },
    /// Delete the item on the server
    Delete,
}

/// One item of a batch, with the attributes the server needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub item_id: ItemId,
    pub change_id: ChangeId,
    pub remote_file_name: String,
    pub mime_type: String,
    pub app_file_type: Option<String>,
    pub group_id: Option<String>,
    /// Remote version this device last saw, `None` for a first upload
    pub known_version: Option<u64>,
    pub operation: BatchOperation,
}

/// All pending changes at the moment a commit was dispatched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub items: Vec<BatchItem>,
}

impl CommitBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Change identifiers shipped in this batch
    pub fn change_ids(&self) -> Vec<ChangeId> {
        self.items.iter().map(|i| i.change_id).collect()
    }
}

// ============================================================================
// BatchOutcome
// ============================================================================

/// Result for one item, in the order the transport completed them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Content stored on the server at `version`
    Uploaded { item_id: ItemId, version: u64 },
    /// Item removed from the server
    Deleted { item_id: ItemId },
}

impl ItemOutcome {
    pub fn item_id(&self) -> ItemId {
        match self {
            ItemOutcome::Uploaded { item_id, .. } | ItemOutcome::Deleted { item_id } => *item_id,
        }
    }
}

/// Aggregate result of a successfully committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub items: Vec<ItemOutcome>,
}

impl BatchOutcome {
    /// Number of operations the server performed
    pub fn operation_count(&self) -> usize {
        self.items.len()
    }
}

// ============================================================================
// RemoteFileEntry
// ============================================================================

/// One entry of the server's file index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileEntry {
    pub item_id: ItemId,
    pub remote_file_name: String,
    pub mime_type: String,
    pub app_file_type: Option<String>,
    pub group_id: Option<String>,
    pub version: u64,
    pub deleted: bool,
}

impl RemoteFileEntry {
    /// Attributes reported to the application for a downloaded file
    pub fn attributes(&self) -> SyncAttributes {
        SyncAttributes {
            item_id: self.item_id,
            remote_file_name: Some(self.remote_file_name.clone()),
            mime_type: Some(self.mime_type.clone()),
            app_file_type: self.app_file_type.clone(),
            group_id: self.group_id.clone(),
            deleted: Some(self.deleted),
        }
    }
}

// ============================================================================
// ITransport trait
// ============================================================================

/// Port trait for moving changes to and from the cloud-storage service
#[async_trait::async_trait]
pub trait ITransport: Send + Sync {
    /// Applies a batch atomically on the server
    ///
    /// Either every item is applied and an outcome per item is returned, or
    /// an error is returned and the server state is unchanged.
    async fn submit_batch(&self, batch: &CommitBatch) -> Result<BatchOutcome, TransportError>;

    /// Lists every file the server knows about
    async fn current_file_index(&self) -> Result<Vec<RemoteFileEntry>, TransportError>;

    /// Downloads the content of an index entry to a local file
    async fn download(&self, entry: &RemoteFileEntry) -> Result<PathBuf, TransportError>;

    /// Clears server-side state held for this client (e.g. a stale lock)
    async fn reset(&self) -> Result<(), TransportError>;
}
