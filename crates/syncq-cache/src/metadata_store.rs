//! SQLite implementation of IMetadataStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! metadata store port defined in syncq-core. It handles the mapping between
//! domain types and columns, and writes every record together with its
//! pending changes inside one transaction.
//!
//! ## Type Mapping
//!
//! | Domain Type        | SQL Type | Strategy                                   |
//! |--------------------|----------|--------------------------------------------|
//! | ItemId, ChangeId   | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | Option<u64>        | INTEGER  | `i64`, NULL before the first upload       |
//! | DateTime<Utc>      | TEXT     | ISO 8601 via `to_rfc3339()`                |
//! | ChangeKind         | TEXT     | `upload` / `deletion` + payload columns    |
//! | PayloadOwnership   | TEXT     | `retain` / `transfer`                      |
//! | EngineMode         | TEXT     | tagged JSON record under key `mode`        |
//!
//! Pending changes carry an autoincrement `seq` assigned on first insert.
//! Changes are immutable, so re-saving a record keeps the `seq` of changes it
//! already had, and [`IMetadataStore::list_pending`] can order records by
//! their oldest change.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use syncq_core::domain::{
    ChangeId, ChangeKind, EngineMode, ItemId, LocalFileMetadata, PayloadOwnership, PendingChange,
    SyncAttributes,
};
use syncq_core::ports::IMetadataStore;

use crate::CacheError;

/// Key of the persisted mode in `engine_state`
const MODE_KEY: &str = "mode";

/// SQLite-based implementation of the metadata store port
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn ownership_from_string(s: &str) -> Result<PayloadOwnership, CacheError> {
    match s {
        "retain" => Ok(PayloadOwnership::Retain),
        "transfer" => Ok(PayloadOwnership::Transfer),
        other => Err(CacheError::SerializationError(format!(
            "Unknown payload ownership: {}",
            other
        ))),
    }
}

/// Splits a change kind into its `(kind, payload, ownership)` columns
fn change_kind_to_columns(kind: &ChangeKind) -> (&'static str, Option<String>, Option<&'static str>) {
    match kind {
        ChangeKind::Upload { payload, ownership } => (
            "upload",
            Some(payload.to_string_lossy().into_owned()),
            Some(ownership.as_str()),
        ),
        ChangeKind::Deletion => ("deletion", None, None),
    }
}

fn change_kind_from_columns(
    kind: &str,
    payload: Option<String>,
    ownership: Option<String>,
) -> Result<ChangeKind, CacheError> {
    match kind {
        "upload" => {
            let payload = payload.ok_or_else(|| {
                CacheError::SerializationError("Upload change without payload".to_string())
            })?;
            let ownership = ownership.ok_or_else(|| {
                CacheError::SerializationError("Upload change without ownership".to_string())
            })?;
            Ok(ChangeKind::Upload {
                payload: PathBuf::from(payload),
                ownership: ownership_from_string(&ownership)?,
            })
        }
        "deletion" => Ok(ChangeKind::Deletion),
        other => Err(CacheError::SerializationError(format!(
            "Unknown change kind: {}",
            other
        ))),
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_item_id(s: &str) -> Result<ItemId, CacheError> {
    ItemId::from_str(s).map_err(|e| CacheError::SerializationError(e.to_string()))
}

fn version_to_column(version: Option<u64>) -> Result<Option<i64>, CacheError> {
    version
        .map(|v| {
            i64::try_from(v).map_err(|_| {
                CacheError::SerializationError(format!("Version {} out of range", v))
            })
        })
        .transpose()
}

fn version_from_column(version: Option<i64>) -> Result<Option<u64>, CacheError> {
    version
        .map(|v| {
            u64::try_from(v).map_err(|_| {
                CacheError::SerializationError(format!("Negative stored version {}", v))
            })
        })
        .transpose()
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn change_from_row(row: &SqliteRow) -> Result<PendingChange, CacheError> {
    let change_id_str: String = row.try_get("change_id")?;
    let kind: String = row.try_get("kind")?;
    let payload: Option<String> = row.try_get("payload")?;
    let ownership: Option<String> = row.try_get("ownership")?;
    let enqueued_at: String = row.try_get("enqueued_at")?;

    let id = ChangeId::from_str(&change_id_str)
        .map_err(|e| CacheError::SerializationError(e.to_string()))?;
    Ok(PendingChange::restore(
        id,
        change_kind_from_columns(&kind, payload, ownership)?,
        parse_datetime(&enqueued_at)?,
    ))
}

fn metadata_from_row(
    row: &SqliteRow,
    changes: Vec<PendingChange>,
) -> Result<LocalFileMetadata, CacheError> {
    let item_id: String = row.try_get("item_id")?;
    let remote_file_name: String = row.try_get("remote_file_name")?;
    let mime_type: String = row.try_get("mime_type")?;
    let app_file_type: Option<String> = row.try_get("app_file_type")?;
    let group_id: Option<String> = row.try_get("group_id")?;
    let version: Option<i64> = row.try_get("version")?;
    let deleted_on_server: bool = row.try_get("deleted_on_server")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(
        LocalFileMetadata::new(parse_item_id(&item_id)?, remote_file_name, mime_type)
            .with_app_file_type(app_file_type)
            .with_group_id(group_id)
            .with_version(version_from_column(version)?)
            .with_deleted_on_server(deleted_on_server)
            .with_pending_changes(changes)
            .with_updated_at(parse_datetime(&updated_at)?),
    )
}

// ============================================================================
// Queries shared by the trait methods
// ============================================================================

/// Writes a record and reconciles its pending changes on `conn`
async fn write_record(
    conn: &mut SqliteConnection,
    metadata: &LocalFileMetadata,
) -> Result<(), CacheError> {
    let item_id = metadata.item_id().to_string();

    sqlx::query(
        "INSERT INTO local_files \
         (item_id, remote_file_name, mime_type, app_file_type, group_id, \
          version, deleted_on_server, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(item_id) DO UPDATE SET \
          remote_file_name = excluded.remote_file_name, \
          mime_type = excluded.mime_type, \
          app_file_type = excluded.app_file_type, \
          group_id = excluded.group_id, \
          version = excluded.version, \
          deleted_on_server = excluded.deleted_on_server, \
          updated_at = excluded.updated_at",
    )
    .bind(&item_id)
    .bind(metadata.remote_file_name())
    .bind(metadata.mime_type())
    .bind(metadata.app_file_type())
    .bind(metadata.group_id())
    .bind(version_to_column(metadata.version())?)
    .bind(metadata.deleted_on_server())
    .bind(metadata.updated_at().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    let stored: Vec<String> =
        sqlx::query_scalar("SELECT change_id FROM pending_changes WHERE item_id = ?")
            .bind(&item_id)
            .fetch_all(&mut *conn)
            .await?;
    let current: HashSet<String> = metadata
        .pending_changes()
        .iter()
        .map(|c| c.id().to_string())
        .collect();

    for stale in stored.iter().filter(|id| !current.contains(*id)) {
        sqlx::query("DELETE FROM pending_changes WHERE change_id = ?")
            .bind(stale)
            .execute(&mut *conn)
            .await?;
    }

    for change in metadata.pending_changes() {
        let (kind, payload, ownership) = change_kind_to_columns(change.kind());
        sqlx::query(
            "INSERT INTO pending_changes \
             (change_id, item_id, kind, payload, ownership, enqueued_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(change_id) DO NOTHING",
        )
        .bind(change.id().to_string())
        .bind(&item_id)
        .bind(kind)
        .bind(payload)
        .bind(ownership)
        .bind(change.enqueued_at().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

impl SqliteMetadataStore {
    async fn changes_for(&self, item_id: &str) -> Result<Vec<PendingChange>, CacheError> {
        let rows = sqlx::query("SELECT * FROM pending_changes WHERE item_id = ? ORDER BY seq")
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(change_from_row).collect()
    }

    /// Every pending change, grouped by item, each group in enqueue order
    async fn changes_by_item(&self) -> Result<HashMap<String, Vec<PendingChange>>, CacheError> {
        let rows = sqlx::query("SELECT * FROM pending_changes ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        let mut grouped: HashMap<String, Vec<PendingChange>> = HashMap::new();
        for row in &rows {
            let item_id: String = row.try_get("item_id")?;
            grouped.entry(item_id).or_default().push(change_from_row(row)?);
        }
        Ok(grouped)
    }

    async fn records_from_rows(
        &self,
        rows: &[SqliteRow],
    ) -> Result<Vec<LocalFileMetadata>, CacheError> {
        let mut changes = self.changes_by_item().await?;
        rows.iter()
            .map(|row| {
                let item_id: String = row.try_get("item_id")?;
                metadata_from_row(row, changes.remove(&item_id).unwrap_or_default())
            })
            .collect()
    }
}

// ============================================================================
// IMetadataStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IMetadataStore for SqliteMetadataStore {
    async fn find(&self, id: &ItemId) -> anyhow::Result<Option<LocalFileMetadata>> {
        let id_str = id.to_string();

        let row = sqlx::query("SELECT * FROM local_files WHERE item_id = ?")
            .bind(&id_str)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => {
                let changes = self.changes_for(&id_str).await?;
                Ok(Some(metadata_from_row(r, changes)?))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, attrs: &SyncAttributes) -> anyhow::Result<LocalFileMetadata> {
        let metadata = LocalFileMetadata::from_attributes(attrs)?;
        let id_str = metadata.item_id().to_string();

        let mut tx = self.pool.begin().await?;
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM local_files WHERE item_id = ?")
            .bind(&id_str)
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            return Err(CacheError::AlreadyExists(id_str).into());
        }
        write_record(&mut tx, &metadata).await?;
        tx.commit().await?;

        tracing::debug!(item_id = %id_str, "Created metadata record");
        Ok(metadata)
    }

    async fn save(&self, metadata: &LocalFileMetadata) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        write_record(&mut tx, metadata).await?;
        tx.commit().await?;

        tracing::trace!(item_id = %metadata.item_id(), "Saved metadata record");
        Ok(())
    }

    async fn save_batch(&self, records: &[LocalFileMetadata]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for metadata in records {
            write_record(&mut tx, metadata).await?;
        }
        tx.commit().await?;

        tracing::debug!(count = records.len(), "Saved metadata batch");
        Ok(())
    }

    async fn remove(&self, id: &ItemId) -> anyhow::Result<()> {
        let id_str = id.to_string();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pending_changes WHERE item_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM local_files WHERE item_id = ?")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(item_id = %id_str, "Removed metadata record");
        Ok(())
    }

    async fn remove_all(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pending_changes")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM local_files")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(removed = result.rows_affected(), "Removed all metadata");
        Ok(result.rows_affected())
    }

    async fn list_pending(&self) -> anyhow::Result<Vec<LocalFileMetadata>> {
        let rows = sqlx::query(
            "SELECT f.* FROM local_files f \
             JOIN (SELECT item_id, MIN(seq) AS first_seq \
                   FROM pending_changes GROUP BY item_id) p \
             ON p.item_id = f.item_id \
             ORDER BY p.first_seq",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(self.records_from_rows(&rows).await?)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<LocalFileMetadata>> {
        let rows = sqlx::query("SELECT * FROM local_files ORDER BY remote_file_name, item_id")
            .fetch_all(&self.pool)
            .await?;

        Ok(self.records_from_rows(&rows).await?)
    }

    async fn load_mode(&self) -> anyhow::Result<Option<EngineMode>> {
        let record: Option<String> =
            sqlx::query_scalar("SELECT value FROM engine_state WHERE key = ?")
                .bind(MODE_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match record {
            Some(record) => {
                let mode = EngineMode::decode(&record)
                    .map_err(|e| CacheError::SerializationError(e.to_string()))?;
                Ok(Some(mode))
            }
            None => Ok(None),
        }
    }

    async fn save_mode(&self, mode: &EngineMode) -> anyhow::Result<()> {
        let record = mode
            .encode()
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO engine_state (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(MODE_KEY)
        .bind(&record)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(mode = mode.name(), "Persisted engine mode");
        Ok(())
    }
}
