//! Persisted mode tracking
//!
//! [`ModeTracker`] owns the engine's current [`EngineMode`]. Every
//! transition is written to the metadata store before observers see it, and
//! transitions are serialized so a late batch completion cannot race an error
//! raised by the caller.

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use syncq_core::domain::EngineMode;
use syncq_core::ports::{IMetadataStore, ISyncDelegate};

pub struct ModeTracker {
    store: Arc<dyn IMetadataStore + Send + Sync>,
    delegate: Arc<dyn ISyncDelegate + Send + Sync>,
    current: RwLock<EngineMode>,
    transition: Mutex<()>,
}

impl ModeTracker {
    pub fn new(
        store: Arc<dyn IMetadataStore + Send + Sync>,
        delegate: Arc<dyn ISyncDelegate + Send + Sync>,
    ) -> Self {
        Self {
            store,
            delegate,
            current: RwLock::new(EngineMode::Idle),
            transition: Mutex::new(()),
        }
    }

    /// Snapshot of the current mode
    pub fn current(&self) -> EngineMode {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Loads the persisted mode, starting `Idle` on first launch
    ///
    /// An undecodable record is returned as an error and leaves the
    /// in-memory mode untouched.
    pub async fn restore(&self) -> anyhow::Result<EngineMode> {
        let _guard = self.transition.lock().await;
        let mode = match self.store.load_mode().await? {
            Some(mode) => mode,
            None => {
                self.store.save_mode(&EngineMode::Idle).await?;
                EngineMode::Idle
            }
        };
        info!(mode = mode.name(), "Restored engine mode");
        self.replace(mode.clone());
        Ok(mode)
    }

    /// Moves to `mode`
    ///
    /// The in-memory mode and observers are updated even when persisting
    /// fails; the persistence error is returned to the caller.
    pub async fn set(&self, mode: EngineMode) -> anyhow::Result<()> {
        let _guard = self.transition.lock().await;
        self.apply(mode).await
    }

    /// Moves to `mode` unless an error mode was entered meanwhile
    ///
    /// Returns `false` if the current mode is an error mode.
    pub async fn set_unless_error(&self, mode: EngineMode) -> anyhow::Result<bool> {
        let _guard = self.transition.lock().await;
        if self.current().is_error() {
            debug!(target_mode = mode.name(), "Keeping error mode");
            return Ok(false);
        }
        self.apply(mode).await?;
        Ok(true)
    }

    async fn apply(&self, mode: EngineMode) -> anyhow::Result<()> {
        if self.current() == mode {
            return Ok(());
        }
        let persisted = self.store.save_mode(&mode).await;
        if let Err(e) = &persisted {
            error!(mode = mode.name(), error = %e, "Failed to persist engine mode");
        }
        info!(mode = mode.name(), "Engine mode changed");
        self.replace(mode.clone());
        self.delegate.on_mode_change(&mode);
        persisted
    }

    fn replace(&self, mode: EngineMode) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
    }
}
