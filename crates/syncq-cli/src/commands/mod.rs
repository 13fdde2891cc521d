//! CLI subcommands

pub mod completions;
pub mod config;
pub mod inspect;
pub mod reset;

use anyhow::{Context, Result};
use serde_json::json;

use syncq_cache::{DatabasePool, SqliteMetadataStore};
use syncq_core::config::Config;
use syncq_core::domain::{ChangeKind, LocalFileMetadata};

use crate::output::OutputFormatter;

/// Opens the metadata store named in the configuration
///
/// Returns `None` (after telling the user) when no database exists yet.
pub async fn open_store(
    config: &Config,
    formatter: &dyn OutputFormatter,
) -> Result<Option<SqliteMetadataStore>> {
    let db_path = &config.storage.database_path;
    if !db_path.exists() {
        formatter.error(&format!(
            "No metadata database at {}. Has an application using syncq run yet?",
            db_path.display()
        ));
        return Ok(None);
    }

    let pool = DatabasePool::new(db_path)
        .await
        .context("Failed to open metadata database")?;
    Ok(Some(SqliteMetadataStore::new(pool.pool().clone())))
}

/// JSON view of a metadata record
pub fn record_json(record: &LocalFileMetadata) -> serde_json::Value {
    let changes: Vec<serde_json::Value> = record
        .pending_changes()
        .iter()
        .map(|change| match change.kind() {
            ChangeKind::Upload { payload, ownership } => json!({
                "change_id": change.id().to_string(),
                "kind": "upload",
                "payload": payload.display().to_string(),
                "ownership": ownership.as_str(),
                "enqueued_at": change.enqueued_at().to_rfc3339(),
            }),
            ChangeKind::Deletion => json!({
                "change_id": change.id().to_string(),
                "kind": "deletion",
                "enqueued_at": change.enqueued_at().to_rfc3339(),
            }),
        })
        .collect();

    json!({
        "item_id": record.item_id().to_string(),
        "remote_file_name": record.remote_file_name(),
        "mime_type": record.mime_type(),
        "app_file_type": record.app_file_type(),
        "group_id": record.group_id(),
        "version": record.version(),
        "deleted": record.deleted_on_server(),
        "pending_changes": changes,
        "updated_at": record.updated_at().to_rfc3339(),
    })
}

/// One-line summary of a record's pending changes
pub fn describe_pending(record: &LocalFileMetadata) -> String {
    if record.pending_deletion() {
        return "deletion".to_string();
    }
    match record.pending_changes().len() {
        0 => "none".to_string(),
        1 => "upload".to_string(),
        n => format!("{n} changes"),
    }
}
