//! Planning of remote index entries
//!
//! During a remote check every entry of the server's file index is compared
//! with the local record of the same identifier. Items with queued local
//! changes are left alone: the local change will be committed over them.

use syncq_core::domain::LocalFileMetadata;
use syncq_core::ports::RemoteFileEntry;

/// What a remote check does with one index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    /// Fetch the content; the server holds a version this device lacks
    Download,
    /// Record that another device deleted the item
    MarkDeleted,
    /// The local record has pending changes; skip the entry
    Conflict,
    /// Nothing to do
    UpToDate,
}

/// Decides the action for `entry` given the local record, if any
pub fn plan_entry(known: Option<&LocalFileMetadata>, entry: &RemoteFileEntry) -> RemoteAction {
    match known {
        Some(record) if record.has_pending_changes() => RemoteAction::Conflict,
        Some(record) if entry.deleted => {
            if record.deleted_on_server() {
                RemoteAction::UpToDate
            } else {
                RemoteAction::MarkDeleted
            }
        }
        Some(record) => match record.version() {
            Some(local) if local >= entry.version => RemoteAction::UpToDate,
            _ => RemoteAction::Download,
        },
        None if entry.deleted => RemoteAction::UpToDate,
        None => RemoteAction::Download,
    }
}

#[cfg(test)]
mod tests {
    use syncq_core::domain::{ItemId, PayloadOwnership, PendingChange};

    use super::*;

    fn entry(version: u64, deleted: bool) -> RemoteFileEntry {
        RemoteFileEntry {
            item_id: ItemId::new(),
            remote_file_name: "a.txt".into(),
            mime_type: "text/plain".into(),
            app_file_type: None,
            group_id: None,
            version,
            deleted,
        }
    }

    fn record_at(entry: &RemoteFileEntry, version: Option<u64>) -> LocalFileMetadata {
        LocalFileMetadata::new(entry.item_id, "a.txt", "text/plain").with_version(version)
    }

    #[test]
    fn test_unknown_item_is_downloaded() {
        assert_eq!(plan_entry(None, &entry(1, false)), RemoteAction::Download);
    }

    #[test]
    fn test_unknown_deleted_item_is_ignored() {
        assert_eq!(plan_entry(None, &entry(1, true)), RemoteAction::UpToDate);
    }

    #[test]
    fn test_newer_remote_version_is_downloaded() {
        let e = entry(5, false);
        assert_eq!(
            plan_entry(Some(&record_at(&e, Some(4))), &e),
            RemoteAction::Download
        );
        assert_eq!(
            plan_entry(Some(&record_at(&e, None)), &e),
            RemoteAction::Download
        );
        assert_eq!(
            plan_entry(Some(&record_at(&e, Some(5))), &e),
            RemoteAction::UpToDate
        );
    }

    #[test]
    fn test_remote_deletion_is_recorded_once() {
        let e = entry(2, true);
        let record = record_at(&e, Some(2));
        assert_eq!(plan_entry(Some(&record), &e), RemoteAction::MarkDeleted);

        let deleted = record.with_deleted_on_server(true);
        assert_eq!(plan_entry(Some(&deleted), &e), RemoteAction::UpToDate);
    }

    #[test]
    fn test_pending_local_change_wins() {
        let e = entry(9, false);
        let mut record = record_at(&e, Some(1));
        record.enqueue_upload(PendingChange::upload("/tmp/a", PayloadOwnership::Retain));
        assert_eq!(plan_entry(Some(&record), &e), RemoteAction::Conflict);
    }
}
