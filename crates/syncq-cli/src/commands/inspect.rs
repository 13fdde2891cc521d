//! Read-only inspection commands
//!
//! `syncq mode`, `syncq status <ITEM_ID>` and `syncq pending` read the
//! metadata store directly; they never start an engine or touch the network.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tracing::info;

use syncq_core::config::Config;
use syncq_core::domain::{EngineMode, ItemId};
use syncq_core::ports::IMetadataStore;

use super::{describe_pending, open_store, record_json};
use crate::output::{get_formatter, OutputFormat};

// ============================================================================
// mode
// ============================================================================

#[derive(Debug, Args)]
pub struct ModeCommand {}

impl ModeCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let Some(store) = open_store(config, &*formatter).await? else {
            return Ok(());
        };

        let mode = store
            .load_mode()
            .await
            .context("Failed to read the persisted mode")?;
        info!(mode = ?mode.as_ref().map(EngineMode::name), "Read persisted mode");

        if format.is_json() {
            let value = match &mode {
                Some(mode) => json!({ "mode": mode.name(), "detail": mode.to_string() }),
                None => json!({ "mode": null }),
            };
            formatter.print_json(&value);
            return Ok(());
        }

        match mode {
            None => formatter.info("No mode recorded yet (engine never launched)"),
            Some(mode) if mode.is_error() => {
                formatter.warn(&format!("Engine is in {}", mode));
                formatter.info("The application must call reset_from_error to continue.");
            }
            Some(mode) => formatter.success(&format!("Engine mode: {}", mode)),
        }
        Ok(())
    }
}

// ============================================================================
// status
// ============================================================================

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Item identifier (UUID)
    pub item_id: String,
}

impl StatusCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let item_id: ItemId = self
            .item_id
            .parse()
            .with_context(|| format!("'{}' is not a valid item identifier", self.item_id))?;

        let Some(store) = open_store(config, &*formatter).await? else {
            return Ok(());
        };
        let record = store
            .find(&item_id)
            .await
            .context("Failed to query the metadata store")?;

        let Some(record) = record else {
            if format.is_json() {
                formatter.print_json(&json!({ "item_id": item_id.to_string(), "found": false }));
            } else {
                formatter.error(&format!("Item {} is not tracked", item_id));
            }
            return Ok(());
        };

        if format.is_json() {
            formatter.print_json(&record_json(&record));
            return Ok(());
        }

        formatter.success(&format!("Item {}", item_id));
        formatter.field("Remote file name", record.remote_file_name());
        formatter.field("MIME type", record.mime_type());
        if let Some(app_file_type) = record.app_file_type() {
            formatter.field("App file type", app_file_type);
        }
        if let Some(group_id) = record.group_id() {
            formatter.field("Group", group_id);
        }
        formatter.field(
            "Remote version",
            &record
                .version()
                .map_or_else(|| "never uploaded".to_string(), |v| v.to_string()),
        );
        formatter.field(
            "Deleted",
            if record.deleted_on_server() { "yes" } else { "no" },
        );
        formatter.field("Pending", &describe_pending(&record));
        formatter.field("Updated", &record.updated_at().to_rfc3339());
        Ok(())
    }
}

// ============================================================================
// pending
// ============================================================================

#[derive(Debug, Args)]
pub struct PendingCommand {}

impl PendingCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let Some(store) = open_store(config, &*formatter).await? else {
            return Ok(());
        };
        let pending = store
            .list_pending()
            .await
            .context("Failed to list pending changes")?;

        if format.is_json() {
            let items: Vec<serde_json::Value> = pending.iter().map(record_json).collect();
            formatter.print_json(&json!({ "count": items.len(), "items": items }));
            return Ok(());
        }

        if pending.is_empty() {
            formatter.success("No pending changes");
            return Ok(());
        }
        formatter.success(&format!(
            "{} item{} with pending changes (commit order):",
            pending.len(),
            if pending.len() == 1 { "" } else { "s" }
        ));
        for record in &pending {
            formatter.info(&format!(
                "{}  {:<10} {}",
                record.item_id(),
                describe_pending(record),
                record.remote_file_name()
            ));
        }
        Ok(())
    }
}
