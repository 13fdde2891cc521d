//! LocalFileMetadata domain entity
//!
//! One [`LocalFileMetadata`] exists per tracked identifier. It records what
//! the server is believed to hold (remote name, MIME type, version, deletion)
//! and owns the ordered list of [`PendingChange`]s not yet confirmed by the
//! server.
//!
//! ## Coalescing
//!
//! ```text
//!   upload(A) ──► [A]
//!   upload(B) ──► [B]            last upload wins
//!   delete    ──► [Delete]       a deletion discards queued uploads
//!   upload(C) ──► rejected       nothing may follow a deletion
//! ```
//!
//! At most one effective change survives per identifier between commits.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attributes::SyncAttributes;
use super::errors::ClientApiError;
use super::newtypes::{ChangeId, ItemId};

// ============================================================================
// PayloadOwnership
// ============================================================================

/// Who owns the payload file of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadOwnership {
    /// The caller keeps the file and guarantees it is unchanged until transfer
    Retain,
    /// The engine deletes the file once the transfer is confirmed
    Transfer,
}

impl PayloadOwnership {
    /// Returns true if the engine must delete the payload after transfer
    pub fn delete_after_upload(&self) -> bool {
        matches!(self, PayloadOwnership::Transfer)
    }

    /// Storage name of the ownership
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadOwnership::Retain => "retain",
            PayloadOwnership::Transfer => "transfer",
        }
    }
}

// ============================================================================
// PendingChange
// ============================================================================

/// Kind of a queued change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    /// Upload new content from a local payload
    Upload {
        payload: PathBuf,
        ownership: PayloadOwnership,
    },
    /// Delete the item on the server
    Deletion,
}

/// A local change waiting to be committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    id: ChangeId,
    kind: ChangeKind,
    enqueued_at: DateTime<Utc>,
}

impl PendingChange {
    /// Creates an upload change
    pub fn upload(payload: impl Into<PathBuf>, ownership: PayloadOwnership) -> Self {
        Self {
            id: ChangeId::new(),
            kind: ChangeKind::Upload {
                payload: payload.into(),
                ownership,
            },
            enqueued_at: Utc::now(),
        }
    }

    /// Creates a deletion marker
    pub fn deletion() -> Self {
        Self {
            id: ChangeId::new(),
            kind: ChangeKind::Deletion,
            enqueued_at: Utc::now(),
        }
    }

    /// Rebuilds a change from stored fields
    pub fn restore(id: ChangeId, kind: ChangeKind, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            kind,
            enqueued_at,
        }
    }

    pub fn id(&self) -> ChangeId {
        self.id
    }

    pub fn kind(&self) -> &ChangeKind {
        &self.kind
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.kind, ChangeKind::Deletion)
    }

    /// Returns the payload path if the engine owns it
    pub fn owned_payload(&self) -> Option<&Path> {
        match &self.kind {
            ChangeKind::Upload { payload, ownership } if ownership.delete_after_upload() => {
                Some(payload.as_path())
            }
            _ => None,
        }
    }
}

// ============================================================================
// ResetKind
// ============================================================================

/// Per-item development reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetKind {
    /// Remove the metadata record entirely
    DeleteMetadata,
    /// Clear the deleted-on-server flag
    Undelete,
    /// Step the known remote version back by one
    DecrementVersion,
}

// ============================================================================
// LocalFileMetadata
// ============================================================================

/// Local record of one synchronized item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileMetadata {
    item_id: ItemId,
    remote_file_name: String,
    mime_type: String,
    app_file_type: Option<String>,
    group_id: Option<String>,
    /// Last remote version known to this device; `None` before the first upload
    version: Option<u64>,
    deleted_on_server: bool,
    pending_changes: Vec<PendingChange>,
    updated_at: DateTime<Utc>,
}

impl LocalFileMetadata {
    /// Creates metadata for an identifier seen for the first time
    ///
    /// Fails with a [`ClientApiError`] when the remote file name or the MIME
    /// type is missing, so no partial record can come into existence.
    pub fn from_attributes(attrs: &SyncAttributes) -> Result<Self, ClientApiError> {
        let mime_type = attrs
            .mime_type
            .clone()
            .ok_or_else(|| ClientApiError::MimeTypeNotGiven {
                item_id: attrs.item_id.to_string(),
            })?;
        let remote_file_name =
            attrs
                .remote_file_name
                .clone()
                .ok_or_else(|| ClientApiError::RemoteFileNameNotGiven {
                    item_id: attrs.item_id.to_string(),
                })?;

        let mut metadata = Self::new(attrs.item_id, remote_file_name, mime_type);
        metadata.app_file_type = attrs.app_file_type.clone();
        metadata.group_id = attrs.group_id.clone();
        Ok(metadata)
    }

    /// Creates metadata with the required fields and no pending changes
    pub fn new(
        item_id: ItemId,
        remote_file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            item_id,
            remote_file_name: remote_file_name.into(),
            mime_type: mime_type.into(),
            app_file_type: None,
            group_id: None,
            version: None,
            deleted_on_server: false,
            pending_changes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    // --- Builders used when restoring from storage ---

    pub fn with_app_file_type(mut self, app_file_type: Option<String>) -> Self {
        self.app_file_type = app_file_type;
        self
    }

    pub fn with_group_id(mut self, group_id: Option<String>) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn with_version(mut self, version: Option<u64>) -> Self {
        self.version = version;
        self
    }

    pub fn with_deleted_on_server(mut self, deleted: bool) -> Self {
        self.deleted_on_server = deleted;
        self
    }

    pub fn with_pending_changes(mut self, changes: Vec<PendingChange>) -> Self {
        self.pending_changes = changes;
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    // --- Getters ---

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn remote_file_name(&self) -> &str {
        &self.remote_file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn app_file_type(&self) -> Option<&str> {
        self.app_file_type.as_deref()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn deleted_on_server(&self) -> bool {
        self.deleted_on_server
    }

    pub fn pending_changes(&self) -> &[PendingChange] {
        &self.pending_changes
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if a deletion is queued for this item
    pub fn pending_deletion(&self) -> bool {
        self.pending_changes.iter().any(PendingChange::is_deletion)
    }

    /// Returns true if any change is queued for this item
    pub fn has_pending_changes(&self) -> bool {
        !self.pending_changes.is_empty()
    }

    /// Returns the attributes the application sees for this item
    pub fn attributes(&self) -> SyncAttributes {
        SyncAttributes {
            item_id: self.item_id,
            remote_file_name: Some(self.remote_file_name.clone()),
            mime_type: Some(self.mime_type.clone()),
            app_file_type: self.app_file_type.clone(),
            group_id: self.group_id.clone(),
            deleted: Some(self.deleted_on_server),
        }
    }

    // --- Validation ---

    /// Checks that an upload with `attrs` may be queued for this item
    pub fn check_upload(&self, attrs: &SyncAttributes) -> Result<(), ClientApiError> {
        if self.deleted_on_server {
            return Err(ClientApiError::FileWasAlreadyDeleted {
                item_id: self.item_id.to_string(),
            });
        }
        if self.pending_deletion() {
            return Err(ClientApiError::PendingDeletion {
                item_id: self.item_id.to_string(),
            });
        }
        if let Some(given) = &attrs.remote_file_name {
            if *given != self.remote_file_name {
                return Err(ClientApiError::DifferentRemoteFileName {
                    item_id: self.item_id.to_string(),
                    stored: self.remote_file_name.clone(),
                    given: given.clone(),
                });
            }
        }
        if let Some(given) = &attrs.mime_type {
            if *given != self.mime_type {
                return Err(ClientApiError::DifferentMimeType {
                    item_id: self.item_id.to_string(),
                    stored: self.mime_type.clone(),
                    given: given.clone(),
                });
            }
        }
        Ok(())
    }

    /// Checks that a deletion may be queued for this item
    pub fn check_delete(&self) -> Result<(), ClientApiError> {
        if self.deleted_on_server {
            return Err(ClientApiError::FileWasAlreadyDeleted {
                item_id: self.item_id.to_string(),
            });
        }
        if self.pending_deletion() {
            return Err(ClientApiError::PendingDeletion {
                item_id: self.item_id.to_string(),
            });
        }
        Ok(())
    }

    // --- Queue mutations ---

    /// Queues an upload, replacing any queued upload
    ///
    /// Returns the superseded changes so the caller can release their payloads.
    pub fn enqueue_upload(&mut self, change: PendingChange) -> Vec<PendingChange> {
        let superseded = std::mem::take(&mut self.pending_changes);
        self.pending_changes.push(change);
        self.touch();
        superseded
    }

    /// Queues a deletion, discarding every queued upload
    ///
    /// Returns the discarded changes.
    pub fn enqueue_deletion(&mut self) -> Vec<PendingChange> {
        let discarded = std::mem::take(&mut self.pending_changes);
        self.pending_changes.push(PendingChange::deletion());
        self.touch();
        discarded
    }

    /// Deletes an item the server never received
    ///
    /// Queued uploads are discarded and the item is marked deleted without a
    /// server round trip. Returns the discarded changes.
    pub fn delete_unsent(&mut self) -> Vec<PendingChange> {
        let discarded = std::mem::take(&mut self.pending_changes);
        self.deleted_on_server = true;
        self.touch();
        discarded
    }

    /// Removes the given changes after the server confirmed them
    ///
    /// Changes queued after the batch was dispatched are kept.
    pub fn acknowledge(&mut self, shipped: &[ChangeId]) {
        self.pending_changes.retain(|c| !shipped.contains(&c.id));
        self.touch();
    }

    /// Records a confirmed upload at the given remote version
    pub fn mark_uploaded(&mut self, version: u64) {
        self.version = Some(version);
        self.touch();
    }

    /// Records a confirmed deletion on the server
    pub fn mark_deleted_on_server(&mut self) {
        self.deleted_on_server = true;
        self.touch();
    }

    /// Records that this device now holds the given remote version
    pub fn mark_downloaded(&mut self, version: u64) {
        self.version = Some(version);
        self.touch();
    }

    /// Applies a per-item development reset
    ///
    /// `DeleteMetadata` is handled by the store, so it is a no-op here.
    pub fn apply_reset(&mut self, kind: ResetKind) {
        match kind {
            ResetKind::DeleteMetadata => {}
            ResetKind::Undelete => self.deleted_on_server = false,
            ResetKind::DecrementVersion => {
                self.version = self.version.and_then(|v| v.checked_sub(1));
            }
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> SyncAttributes {
        SyncAttributes::new(ItemId::new())
            .with_remote_file_name("a.txt")
            .with_mime_type("text/plain")
    }

    #[test]
    fn test_from_attributes_requires_mime_type() {
        let a = SyncAttributes::new(ItemId::new()).with_remote_file_name("a.txt");
        let err = LocalFileMetadata::from_attributes(&a).unwrap_err();
        assert!(matches!(err, ClientApiError::MimeTypeNotGiven { .. }));
    }

    #[test]
    fn test_from_attributes_requires_remote_file_name() {
        let a = SyncAttributes::new(ItemId::new()).with_mime_type("text/plain");
        let err = LocalFileMetadata::from_attributes(&a).unwrap_err();
        assert!(matches!(err, ClientApiError::RemoteFileNameNotGiven { .. }));
    }

    #[test]
    fn test_last_upload_wins() {
        let mut m = LocalFileMetadata::from_attributes(&attrs()).unwrap();
        m.enqueue_upload(PendingChange::upload("/tmp/one", PayloadOwnership::Retain));
        let superseded =
            m.enqueue_upload(PendingChange::upload("/tmp/two", PayloadOwnership::Retain));

        assert_eq!(superseded.len(), 1);
        assert_eq!(m.pending_changes().len(), 1);
        match m.pending_changes()[0].kind() {
            ChangeKind::Upload { payload, .. } => assert_eq!(payload, Path::new("/tmp/two")),
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn test_deletion_discards_uploads() {
        let mut m = LocalFileMetadata::from_attributes(&attrs()).unwrap();
        m.enqueue_upload(PendingChange::upload("/tmp/one", PayloadOwnership::Transfer));
        let discarded = m.enqueue_deletion();

        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].owned_payload(), Some(Path::new("/tmp/one")));
        assert!(m.pending_deletion());
        assert_eq!(m.pending_changes().len(), 1);
    }

    #[test]
    fn test_delete_unsent_marks_deleted_without_queueing() {
        let mut m = LocalFileMetadata::from_attributes(&attrs()).unwrap();
        m.enqueue_upload(PendingChange::upload("/tmp/one", PayloadOwnership::Transfer));
        let discarded = m.delete_unsent();

        assert_eq!(discarded.len(), 1);
        assert!(m.deleted_on_server());
        assert!(!m.has_pending_changes());
        assert!(matches!(
            m.check_upload(&attrs()),
            Err(ClientApiError::FileWasAlreadyDeleted { .. })
        ));
    }

    #[test]
    fn test_check_upload_rejects_pending_deletion() {
        let a = attrs();
        let mut m = LocalFileMetadata::from_attributes(&a).unwrap();
        m.enqueue_deletion();
        assert!(matches!(
            m.check_upload(&a),
            Err(ClientApiError::PendingDeletion { .. })
        ));
    }

    #[test]
    fn test_check_upload_rejects_different_remote_name() {
        let a = attrs();
        let m = LocalFileMetadata::from_attributes(&a).unwrap();
        let other = SyncAttributes::new(a.item_id).with_remote_file_name("b.txt");
        assert!(matches!(
            m.check_upload(&other),
            Err(ClientApiError::DifferentRemoteFileName { .. })
        ));

        // Omitting the name is fine once it is established
        let bare = SyncAttributes::new(a.item_id);
        assert!(m.check_upload(&bare).is_ok());
    }

    #[test]
    fn test_check_upload_rejects_different_mime_type() {
        let a = attrs();
        let m = LocalFileMetadata::from_attributes(&a).unwrap();
        let other = SyncAttributes::new(a.item_id).with_mime_type("image/png");
        match m.check_upload(&other) {
            Err(ClientApiError::DifferentMimeType { stored, given, .. }) => {
                assert_eq!(stored, "text/plain");
                assert_eq!(given, "image/png");
            }
            other => panic!("unexpected result {other:?}"),
        }

        // Repeating the stored value is fine
        let same = SyncAttributes::new(a.item_id).with_mime_type("text/plain");
        assert!(m.check_upload(&same).is_ok());
    }

    #[test]
    fn test_check_delete_rejects_deleted_item() {
        let mut m = LocalFileMetadata::from_attributes(&attrs()).unwrap();
        m.mark_deleted_on_server();
        assert!(matches!(
            m.check_delete(),
            Err(ClientApiError::FileWasAlreadyDeleted { .. })
        ));
    }

    #[test]
    fn test_acknowledge_keeps_later_changes() {
        let mut m = LocalFileMetadata::from_attributes(&attrs()).unwrap();
        m.enqueue_upload(PendingChange::upload("/tmp/one", PayloadOwnership::Retain));
        let shipped: Vec<ChangeId> = m.pending_changes().iter().map(|c| c.id()).collect();

        m.enqueue_upload(PendingChange::upload("/tmp/two", PayloadOwnership::Retain));
        m.acknowledge(&shipped);

        assert_eq!(m.pending_changes().len(), 1);
    }

    #[test]
    fn test_decrement_version_saturates() {
        let mut m = LocalFileMetadata::from_attributes(&attrs())
            .unwrap()
            .with_version(Some(1));
        m.apply_reset(ResetKind::DecrementVersion);
        assert_eq!(m.version(), Some(0));
        m.apply_reset(ResetKind::DecrementVersion);
        assert_eq!(m.version(), None);
    }

    #[test]
    fn test_attributes_report_deleted_flag() {
        let mut m = LocalFileMetadata::from_attributes(&attrs()).unwrap();
        assert_eq!(m.attributes().deleted, Some(false));
        m.mark_deleted_on_server();
        assert_eq!(m.attributes().deleted, Some(true));
    }
}
