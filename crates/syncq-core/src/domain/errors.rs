//! Domain error types
//!
//! Errors raised by domain operations (invalid identifiers, undecodable mode
//! records) and by misuse of the public engine API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// A persisted engine mode record could not be decoded
    #[error("Invalid mode record: {0}")]
    InvalidModeRecord(String),
}

/// Misuse of the engine's public interface by the application
///
/// These are detected synchronously, before any metadata is touched, and are
/// never retried. The variants are serialized as part of a persisted
/// `ClientApiError` mode, so renaming one is a format change.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum ClientApiError {
    /// Negative auto-commit interval
    #[error("Bad auto-commit interval: {seconds}")]
    BadAutoCommitInterval { seconds: f64 },

    /// First upload of an identifier without a MIME type
    #[error("MIME type not given for new item {item_id}")]
    MimeTypeNotGiven { item_id: String },

    /// First upload of an identifier without a remote file name
    #[error("Remote file name not given for new item {item_id}")]
    RemoteFileNameNotGiven { item_id: String },

    /// Remote file name differs from the one already recorded
    #[error("Remote file name '{given}' differs from '{stored}' for item {item_id}")]
    DifferentRemoteFileName {
        item_id: String,
        stored: String,
        given: String,
    },

    /// MIME type differs from the one already recorded
    #[error("MIME type '{given}' differs from '{stored}' for item {item_id}")]
    DifferentMimeType {
        item_id: String,
        stored: String,
        given: String,
    },

    /// Upload or delete of an item already deleted on the server
    #[error("Item {item_id} was already deleted")]
    FileWasAlreadyDeleted { item_id: String },

    /// Upload or delete of an item that already has a deletion queued
    #[error("Item {item_id} is already marked for deletion")]
    PendingDeletion { item_id: String },

    /// Delete of an identifier the engine has never seen
    #[error("Attempt to delete unknown item {item_id}")]
    DeletingUnknownFile { item_id: String },

    /// Commit with no signed-in user
    #[error("There is no user signed in")]
    UserNotSignedIn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidId("xyz".to_string());
        assert_eq!(err.to_string(), "Invalid ID format: xyz");

        let err = DomainError::InvalidModeRecord("unknown variant `warp`".to_string());
        assert_eq!(err.to_string(), "Invalid mode record: unknown variant `warp`");
    }

    #[test]
    fn test_client_api_error_display() {
        let err = ClientApiError::DifferentRemoteFileName {
            item_id: "u1".to_string(),
            stored: "a.txt".to_string(),
            given: "b.txt".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remote file name 'b.txt' differs from 'a.txt' for item u1"
        );
        let err = ClientApiError::DifferentMimeType {
            item_id: "u1".to_string(),
            stored: "text/plain".to_string(),
            given: "image/png".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "MIME type 'image/png' differs from 'text/plain' for item u1"
        );
        assert_eq!(
            ClientApiError::UserNotSignedIn.to_string(),
            "There is no user signed in"
        );
    }

    #[test]
    fn test_client_api_error_serializes_with_code_tag() {
        let err = ClientApiError::MimeTypeNotGiven {
            item_id: "u1".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "mime_type_not_given");
        assert_eq!(json["item_id"], "u1");

        let back: ClientApiError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_error_clone() {
        let err = DomainError::InvalidId("test".to_string());
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
