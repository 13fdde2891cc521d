//! Payload staging
//!
//! `upload_data` hands the engine bytes rather than a file. They are written
//! to `<staging_dir>/<uuid>.tmp`, flushed, and renamed to
//! `<staging_dir>/<uuid>.payload`, so a staged payload is either complete or
//! absent after a crash. Staged payloads are engine-owned and deleted after a
//! confirmed transfer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PayloadStager {
    dir: PathBuf,
}

impl PayloadStager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durably writes `data` to a new payload file and returns its path
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub async fn stage(&self, data: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let id = Uuid::new_v4();
        let tmp_path = self.dir.join(format!("{id}.tmp"));
        let final_path = self.dir.join(format!("{id}.payload"));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path).await?;
        debug!(path = %final_path.display(), "Payload staged");
        Ok(final_path)
    }
}

/// Deletes an engine-owned payload; a missing file is not an error
pub async fn release_payload(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Released payload"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete payload"),
    }
}
