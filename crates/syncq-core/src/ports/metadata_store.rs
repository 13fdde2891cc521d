//! Metadata store port (driven/secondary port)
//!
//! This module defines the interface for persisting local file metadata,
//! the pending changes owned by each record, and the engine mode.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific; the
//!   engine surfaces any of them as an internal error.
//! - `save` and `save_batch` write a record together with its pending changes
//!   in one transaction, so after a crash a record is seen either fully before
//!   or fully after the write.
//! - The mode is stored here as well so that it shares the store's durability.

use crate::domain::{EngineMode, ItemId, LocalFileMetadata, SyncAttributes};

// ============================================================================
// IMetadataStore trait
// ============================================================================

/// Port trait for durable engine state
#[async_trait::async_trait]
pub trait IMetadataStore: Send + Sync {
    // --- Metadata records ---

    /// Looks up the record for an identifier
    async fn find(&self, id: &ItemId) -> anyhow::Result<Option<LocalFileMetadata>>;

    /// Creates and persists a record for an identifier seen for the first time
    ///
    /// Fails if the attributes lack a remote file name or MIME type, or if a
    /// record already exists for the identifier.
    async fn create(&self, attrs: &SyncAttributes) -> anyhow::Result<LocalFileMetadata>;

    /// Saves a record and its pending changes (insert or replace)
    async fn save(&self, metadata: &LocalFileMetadata) -> anyhow::Result<()>;

    /// Saves several records in a single transaction
    async fn save_batch(&self, records: &[LocalFileMetadata]) -> anyhow::Result<()>;

    /// Removes one record and its pending changes
    async fn remove(&self, id: &ItemId) -> anyhow::Result<()>;

    /// Removes every record without touching the network
    ///
    /// Development aid; returns the number of records removed.
    async fn remove_all(&self) -> anyhow::Result<u64>;

    /// Records with at least one pending change, oldest change first
    async fn list_pending(&self) -> anyhow::Result<Vec<LocalFileMetadata>>;

    /// Every record
    async fn list_all(&self) -> anyhow::Result<Vec<LocalFileMetadata>>;

    // --- Engine mode ---

    /// Loads the persisted mode, `None` on first launch
    ///
    /// An undecodable record is an error, never a silent default.
    async fn load_mode(&self) -> anyhow::Result<Option<EngineMode>>;

    /// Persists the mode
    async fn save_mode(&self, mode: &EngineMode) -> anyhow::Result<()>;
}
