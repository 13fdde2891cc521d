//! Change queue
//!
//! The queue is a view over the metadata store: each record owns its pending
//! changes, and enqueueing validates against the record, coalesces, and saves
//! the record back in one store transaction. Nothing here touches the network.
//!
//! Callers serialize enqueue operations; the queue itself does not lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use syncq_core::domain::{
    ChangeKind, ClientApiError, ItemId, LocalFileMetadata, PayloadOwnership, PendingChange,
    SyncAttributes,
};
use syncq_core::ports::{BatchItem, BatchOperation, CommitBatch, IMetadataStore};

/// Enqueue failure
#[derive(Debug, Error)]
pub enum QueueError {
    /// The request violates a precondition; nothing was written
    #[error(transparent)]
    ClientApi(#[from] ClientApiError),

    /// The metadata store failed
    #[error("Metadata store failure: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Result of a successful enqueue
#[derive(Debug)]
pub struct Enqueued {
    /// The record as saved
    pub metadata: LocalFileMetadata,
    /// Engine-owned payloads of the changes this enqueue replaced
    pub released_payloads: Vec<PathBuf>,
    /// The change was settled locally and nothing was queued for the server
    pub local_only: bool,
}

impl Enqueued {
    fn new(
        metadata: LocalFileMetadata,
        replaced: Vec<PendingChange>,
        keep: Option<&Path>,
    ) -> Self {
        let released_payloads = replaced
            .iter()
            .filter_map(PendingChange::owned_payload)
            .filter(|p| Some(*p) != keep)
            .map(Path::to_path_buf)
            .collect();
        Self {
            metadata,
            released_payloads,
            local_only: false,
        }
    }
}

/// Pending changes captured for one commit
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    pub batch: CommitBatch,
    /// Payloads the engine must delete once the batch is confirmed
    pub owned_payloads: Vec<PathBuf>,
}

pub struct ChangeQueue {
    store: Arc<dyn IMetadataStore + Send + Sync>,
}

impl ChangeQueue {
    pub fn new(store: Arc<dyn IMetadataStore + Send + Sync>) -> Self {
        Self { store }
    }

    /// Queues an upload of `payload` for `attrs.item_id`
    pub async fn enqueue_upload(
        &self,
        payload: PathBuf,
        attrs: &SyncAttributes,
        ownership: PayloadOwnership,
    ) -> Result<Enqueued, QueueError> {
        let mut record = match self.store.find(&attrs.item_id).await? {
            Some(record) => {
                record.check_upload(attrs)?;
                record
            }
            None => LocalFileMetadata::from_attributes(attrs)?,
        };

        let replaced = record.enqueue_upload(PendingChange::upload(payload.clone(), ownership));
        self.store.save(&record).await?;

        debug!(
            item_id = %attrs.item_id,
            ownership = ownership.as_str(),
            replaced = replaced.len(),
            "Queued upload"
        );
        Ok(Enqueued::new(record, replaced, Some(&payload)))
    }

    /// Queues a deletion, discarding queued uploads of the item
    ///
    /// An item never uploaded, and not part of the batch in flight
    /// (`in_flight`), is deleted locally instead; nothing is sent.
    pub async fn enqueue_deletion(
        &self,
        item_id: ItemId,
        in_flight: bool,
    ) -> Result<Enqueued, QueueError> {
        let mut record =
            self.store
                .find(&item_id)
                .await?
                .ok_or_else(|| ClientApiError::DeletingUnknownFile {
                    item_id: item_id.to_string(),
                })?;
        record.check_delete()?;

        let local_only = record.version().is_none() && !in_flight;
        let discarded = if local_only {
            record.delete_unsent()
        } else {
            record.enqueue_deletion()
        };
        self.store.save(&record).await?;

        debug!(
            item_id = %item_id,
            discarded = discarded.len(),
            local_only,
            "Queued deletion"
        );
        let mut enqueued = Enqueued::new(record, discarded, None);
        enqueued.local_only = local_only;
        Ok(enqueued)
    }

    /// Records with pending changes, oldest first
    pub async fn pending(&self) -> anyhow::Result<Vec<LocalFileMetadata>> {
        self.store.list_pending().await
    }

    /// Captures every pending change as one batch
    pub async fn snapshot(&self) -> anyhow::Result<PendingBatch> {
        let records = self.store.list_pending().await?;
        Ok(build_batch(&records))
    }
}

/// Builds the batch for `records`, one item per pending change
pub fn build_batch(records: &[LocalFileMetadata]) -> PendingBatch {
    let mut pending = PendingBatch::default();
    for record in records {
        for change in record.pending_changes() {
            let operation = match change.kind() {
                ChangeKind::Upload { payload, .. } => BatchOperation::Upload {
                    payload: payload.clone(),
                },
                ChangeKind::Deletion => BatchOperation::Delete,
            };
            if let Some(owned) = change.owned_payload() {
                pending.owned_payloads.push(owned.to_path_buf());
            }
            pending.batch.items.push(BatchItem {
                item_id: record.item_id(),
                change_id: change.id(),
                remote_file_name: record.remote_file_name().to_string(),
                mime_type: record.mime_type().to_string(),
                app_file_type: record.app_file_type().map(str::to_string),
                group_id: record.group_id().map(str::to_string),
                known_version: record.version(),
                operation,
            });
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use syncq_cache::{DatabasePool, SqliteMetadataStore};

    use super::*;

    async fn setup() -> ChangeQueue {
        let pool = DatabasePool::in_memory().await.unwrap();
        ChangeQueue::new(Arc::new(SqliteMetadataStore::new(pool.pool().clone())))
    }

    fn attrs() -> SyncAttributes {
        SyncAttributes::new(ItemId::new())
            .with_remote_file_name("a.txt")
            .with_mime_type("text/plain")
    }

    #[tokio::test]
    async fn test_upload_of_new_item_creates_record() {
        let queue = setup().await;
        let a = attrs();
        let enqueued = queue
            .enqueue_upload("/tmp/a".into(), &a, PayloadOwnership::Retain)
            .await
            .unwrap();

        assert_eq!(enqueued.metadata.pending_changes().len(), 1);
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_upload_writes_nothing() {
        let queue = setup().await;
        let a = SyncAttributes::new(ItemId::new()).with_mime_type("text/plain");
        let err = queue
            .enqueue_upload("/tmp/a".into(), &a, PayloadOwnership::Retain)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            QueueError::ClientApi(ClientApiError::RemoteFileNameNotGiven { .. })
        ));
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_different_remote_name_is_rejected() {
        let queue = setup().await;
        let a = attrs();
        queue
            .enqueue_upload("/tmp/a".into(), &a, PayloadOwnership::Retain)
            .await
            .unwrap();

        let renamed = SyncAttributes::new(a.item_id).with_remote_file_name("b.txt");
        let err = queue
            .enqueue_upload("/tmp/b".into(), &renamed, PayloadOwnership::Retain)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::ClientApi(ClientApiError::DifferentRemoteFileName { .. })
        ));
    }

    #[tokio::test]
    async fn test_replaced_transfer_payload_is_released() {
        let queue = setup().await;
        let a = attrs();
        queue
            .enqueue_upload("/tmp/one".into(), &a, PayloadOwnership::Transfer)
            .await
            .unwrap();
        let second = queue
            .enqueue_upload("/tmp/two".into(), &a, PayloadOwnership::Transfer)
            .await
            .unwrap();

        assert_eq!(second.released_payloads, vec![PathBuf::from("/tmp/one")]);
    }

    #[tokio::test]
    async fn test_same_payload_path_is_not_released() {
        let queue = setup().await;
        let a = attrs();
        queue
            .enqueue_upload("/tmp/one".into(), &a, PayloadOwnership::Transfer)
            .await
            .unwrap();
        let again = queue
            .enqueue_upload("/tmp/one".into(), &a, PayloadOwnership::Transfer)
            .await
            .unwrap();

        assert!(again.released_payloads.is_empty());
    }

    #[tokio::test]
    async fn test_deletion_of_unknown_item_is_rejected() {
        let queue = setup().await;
        let err = queue.enqueue_deletion(ItemId::new(), false).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::ClientApi(ClientApiError::DeletingUnknownFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_deletion_replaces_upload_and_blocks_further_changes() {
        let queue = setup().await;
        let a = attrs();
        queue
            .enqueue_upload("/tmp/a".into(), &a, PayloadOwnership::Transfer)
            .await
            .unwrap();

        let deleted = queue.enqueue_deletion(a.item_id, true).await.unwrap();
        assert!(!deleted.local_only);
        assert!(deleted.metadata.pending_deletion());
        assert_eq!(deleted.released_payloads, vec![PathBuf::from("/tmp/a")]);

        let err = queue.enqueue_deletion(a.item_id, true).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::ClientApi(ClientApiError::PendingDeletion { .. })
        ));
        let err = queue
            .enqueue_upload("/tmp/b".into(), &a, PayloadOwnership::Retain)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::ClientApi(ClientApiError::PendingDeletion { .. })
        ));
    }

    #[tokio::test]
    async fn test_deletion_of_never_uploaded_item_stays_local() {
        let queue = setup().await;
        let a = attrs();
        queue
            .enqueue_upload("/tmp/a".into(), &a, PayloadOwnership::Transfer)
            .await
            .unwrap();

        let deleted = queue.enqueue_deletion(a.item_id, false).await.unwrap();

        assert!(deleted.local_only);
        assert!(deleted.metadata.deleted_on_server());
        assert_eq!(deleted.released_payloads, vec![PathBuf::from("/tmp/a")]);
        assert!(queue.pending().await.unwrap().is_empty());
        assert!(queue.snapshot().await.unwrap().batch.is_empty());

        let err = queue.enqueue_deletion(a.item_id, false).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::ClientApi(ClientApiError::FileWasAlreadyDeleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_builds_one_item_per_change() {
        let queue = setup().await;
        let a = attrs().with_group_id("g");
        let b = SyncAttributes::new(ItemId::new())
            .with_remote_file_name("b.bin")
            .with_mime_type("application/octet-stream");
        queue
            .enqueue_upload("/tmp/a".into(), &a, PayloadOwnership::Retain)
            .await
            .unwrap();
        queue
            .enqueue_upload("/tmp/b".into(), &b, PayloadOwnership::Transfer)
            .await
            .unwrap();

        let pending = queue.snapshot().await.unwrap();
        let items = &pending.batch.items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, a.item_id);
        assert_eq!(items[0].group_id.as_deref(), Some("g"));
        assert_eq!(items[0].known_version, None);
        assert_eq!(items[1].remote_file_name, "b.bin");
        assert_eq!(pending.owned_payloads, vec![PathBuf::from("/tmp/b")]);
    }

    #[test]
    fn test_build_batch_maps_deletion() {
        let mut record = LocalFileMetadata::new(ItemId::new(), "a.txt", "text/plain");
        record.mark_uploaded(3);
        record.enqueue_deletion();

        let pending = build_batch(&[record]);
        assert_eq!(pending.batch.items[0].operation, BatchOperation::Delete);
        assert_eq!(pending.batch.items[0].known_version, Some(3));
        assert!(pending.owned_payloads.is_empty());
    }
}
