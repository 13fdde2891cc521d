//! Development reset of local metadata
//!
//! `syncq reset-metadata --all` removes every record; `--item <ID> --kind <KIND>`
//! resets one. Only local state changes; the server is never contacted.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde_json::json;
use tracing::warn;

use syncq_core::config::Config;
use syncq_core::domain::{EngineMode, ItemId, ResetKind};
use syncq_core::ports::IMetadataStore;

use super::open_store;
use crate::output::{get_formatter, OutputFormat};

/// Per-item reset, as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResetKindArg {
    /// Remove the record entirely
    DeleteMetadata,
    /// Clear the deleted-on-server flag
    Undelete,
    /// Step the known remote version back by one
    DecrementVersion,
}

impl From<ResetKindArg> for ResetKind {
    fn from(arg: ResetKindArg) -> Self {
        match arg {
            ResetKindArg::DeleteMetadata => ResetKind::DeleteMetadata,
            ResetKindArg::Undelete => ResetKind::Undelete,
            ResetKindArg::DecrementVersion => ResetKind::DecrementVersion,
        }
    }
}

#[derive(Debug, Args)]
pub struct ResetMetadataCommand {
    /// Remove every metadata record
    #[arg(long, conflicts_with_all = ["item", "kind"])]
    pub all: bool,

    /// Item to reset
    #[arg(long, requires = "kind")]
    pub item: Option<String>,

    /// What to reset for the item
    #[arg(long, value_enum)]
    pub kind: Option<ResetKindArg>,
}

impl ResetMetadataCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let Some(store) = open_store(config, &*formatter).await? else {
            return Ok(());
        };

        if store.load_mode().await.ok().flatten() == Some(EngineMode::Synchronizing) {
            formatter.warn("The engine was synchronizing when it last stopped; resetting anyway");
        }

        let (scope, affected) = match (self.all, &self.item, self.kind) {
            (true, _, _) => {
                let removed = store
                    .remove_all()
                    .await
                    .context("Failed to remove metadata")?;
                ("all".to_string(), removed)
            }
            (false, Some(item), Some(kind)) => {
                let item_id: ItemId = item
                    .parse()
                    .with_context(|| format!("'{}' is not a valid item identifier", item))?;
                let affected = reset_item(&store, item_id, kind.into()).await?;
                (item_id.to_string(), affected)
            }
            _ => bail!("Specify either --all or --item <ID> --kind <KIND>"),
        };
        warn!(scope = %scope, affected, "Metadata reset from CLI");

        if format.is_json() {
            formatter.print_json(&json!({ "scope": scope, "affected": affected }));
        } else if affected == 0 {
            formatter.info("Nothing to reset");
        } else {
            formatter.success(&format!(
                "Reset {} record{} ({})",
                affected,
                if affected == 1 { "" } else { "s" },
                scope
            ));
        }
        Ok(())
    }
}

async fn reset_item(store: &dyn IMetadataStore, item_id: ItemId, kind: ResetKind) -> Result<u64> {
    let Some(mut record) = store
        .find(&item_id)
        .await
        .context("Failed to query the metadata store")?
    else {
        return Ok(0);
    };

    if kind == ResetKind::DeleteMetadata {
        store
            .remove(&item_id)
            .await
            .context("Failed to remove metadata")?;
    } else {
        record.apply_reset(kind);
        store
            .save(&record)
            .await
            .context("Failed to save metadata")?;
    }
    Ok(1)
}
