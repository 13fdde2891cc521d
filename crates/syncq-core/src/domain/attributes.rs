//! Sync attributes supplied by the application
//!
//! [`SyncAttributes`] is the DTO an application hands to the engine with every
//! enqueued upload, and the value the engine hands back from status queries
//! and download notifications.

use serde::{Deserialize, Serialize};

use super::newtypes::ItemId;

/// Attributes describing one synchronized item
///
/// `remote_file_name` and `mime_type` are required the first time an
/// identifier is uploaded and are fixed for its lifetime afterwards.
/// `deleted` is only filled in by the engine when reporting status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttributes {
    /// Identifier of the item
    pub item_id: ItemId,
    /// File name on the remote storage
    pub remote_file_name: Option<String>,
    /// MIME type of the content
    pub mime_type: Option<String>,
    /// Application-defined type tag
    pub app_file_type: Option<String>,
    /// Application-defined group identifier
    pub group_id: Option<String>,
    /// Whether the item has been deleted on the server
    pub deleted: Option<bool>,
}

impl SyncAttributes {
    /// Creates attributes carrying only the identifier
    pub fn new(item_id: ItemId) -> Self {
        Self {
            item_id,
            remote_file_name: None,
            mime_type: None,
            app_file_type: None,
            group_id: None,
            deleted: None,
        }
    }

    /// Sets the remote file name
    pub fn with_remote_file_name(mut self, name: impl Into<String>) -> Self {
        self.remote_file_name = Some(name.into());
        self
    }

    /// Sets the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Sets the application type tag
    pub fn with_app_file_type(mut self, app_file_type: impl Into<String>) -> Self {
        self.app_file_type = Some(app_file_type.into());
        self
    }

    /// Sets the group identifier
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}
