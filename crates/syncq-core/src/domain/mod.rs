//! Domain entities and business logic
//!
//! This module contains the core domain types for syncq:
//! - Newtypes for item and change identifiers
//! - Sync attributes supplied by the application
//! - Local file metadata with its queue of pending changes
//! - The persisted engine mode
//! - Domain-specific error types

pub mod attributes;
pub mod errors;
pub mod local_file;
pub mod mode;
pub mod newtypes;

// Re-export commonly used types
pub use attributes::SyncAttributes;
pub use errors::{ClientApiError, DomainError};
pub use local_file::{ChangeKind, LocalFileMetadata, PayloadOwnership, PendingChange, ResetKind};
pub use mode::{EngineError, EngineMode, ErrorDetail};
pub use newtypes::{ChangeId, ItemId};
