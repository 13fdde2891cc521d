//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! engine. Ports are interfaces that the core depends on, but whose
//! implementations live in adapter crates or in the embedding application.
//!
//! ## Ports Overview
//!
//! - [`IMetadataStore`] - Durable metadata, pending changes and engine mode
//! - [`ITransport`] - Batch transfer to and from the cloud-storage service
//! - [`INetworkState`] - Current connectivity
//! - [`IAuthentication`] - Sign-in state
//! - [`ISyncDelegate`] - Notifications to the owning application

pub mod delegate;
pub mod metadata_store;
pub mod network;
pub mod transport;

pub use delegate::{ISyncDelegate, RecoveryStage};
pub use metadata_store::IMetadataStore;
pub use network::{IAuthentication, INetworkState, UserCredentials};
pub use transport::{
    BatchItem, BatchOperation, BatchOutcome, CommitBatch, ITransport, ItemOutcome,
    RemoteFileEntry, TransportError,
};
