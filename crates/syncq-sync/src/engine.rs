//! Queueing, commit and recovery engine
//!
//! [`SyncEngine`] sits between application calls ("upload this file",
//! "delete that item") and the transport. It is a cheap, clonable handle;
//! every clone drives the same engine.
//!
//! ## Flow
//!
//! ```text
//! upload/delete ──► ChangeQueue (validate, coalesce, persist) ──► arm timer
//!
//! commit ──► flight check ──► worker task
//!                               │ snapshot pending changes as one batch
//!                               │ submit with bounded retry
//!                               ▼
//!                  save_batch (one transaction) ──► delegate ──► Idle
//!                               │
//!                       queued commit/sync? ──► run it next
//! ```
//!
//! ## Concurrency
//!
//! - At most one worker runs at a time. `operating` in the flight state is
//!   set by whoever spawns the worker and cleared only when the worker has
//!   no queued job left.
//! - Metadata read-modify-write cycles (enqueue, batch completion, remote
//!   check, development reset) are serialized by `store_lock`.
//! - Delegate notifications of a batch or remote check are sent from the
//!   worker task, per-item first, then the aggregate.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use syncq_core::config::Config;
use syncq_core::domain::{
    ClientApiError, EngineError, EngineMode, ErrorDetail, ItemId, LocalFileMetadata,
    PayloadOwnership, ResetKind, SyncAttributes,
};
use syncq_core::ports::{
    BatchOutcome, CommitBatch, IAuthentication, IMetadataStore, INetworkState, ISyncDelegate,
    ITransport, ItemOutcome, RecoveryStage, RemoteFileEntry, TransportError,
};

use crate::mode::ModeTracker;
use crate::network::{NetworkListener, ReconnectTask};
use crate::queue::{ChangeQueue, Enqueued, QueueError};
use crate::remote::{plan_entry, RemoteAction};
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::scheduler::{AutoCommitTimer, TimerTask};
use crate::staging::{release_payload, PayloadStager};
use crate::SyncError;

// ============================================================================
// Public types
// ============================================================================

/// Result of [`SyncEngine::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No pending changes; nothing happened
    NothingToCommit,
    /// A batch was dispatched
    Started,
    /// A batch or remote check is in flight; the commit runs after it
    Queued,
}

/// Result of [`SyncEngine::sync`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Started,
    Queued,
}

/// Target of [`SyncEngine::reset_metadata`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataResetScope {
    /// Every record
    All,
    /// One record
    Item(ItemId, ResetKind),
}

/// Engine tuning, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub auto_commit_enabled: bool,
    pub auto_commit_interval: Duration,
    pub retry: RetryPolicy,
    pub staging_dir: PathBuf,
}

impl EngineSettings {
    /// Derives settings from configuration, rejecting a bad auto-commit interval
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let interval = AutoCommitTimer::interval_from_secs(config.auto_commit.interval_seconds)?;
        Ok(Self {
            auto_commit_enabled: config.auto_commit.enabled,
            auto_commit_interval: interval,
            retry: RetryPolicy::from_config(&config.retry),
            staging_dir: config.storage.staging_dir.clone(),
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        let config = Config::default();
        Self {
            auto_commit_enabled: config.auto_commit.enabled,
            auto_commit_interval: Duration::from_secs_f64(config.auto_commit.interval_seconds),
            retry: RetryPolicy::from_config(&config.retry),
            staging_dir: config.storage.staging_dir,
        }
    }
}

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Commit,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Completed,
    Halted,
}

#[derive(Debug, Default)]
struct FlightState {
    operating: bool,
    commit_queued: bool,
    sync_queued: bool,
    /// Engine-owned payloads of the batch being transferred
    in_flight_payloads: HashSet<PathBuf>,
    /// Items of the batch being transferred, until its outcome is recorded
    in_flight_items: HashSet<ItemId>,
    /// In-flight payloads replaced by a newer enqueue; deleted when the batch resolves
    orphaned_payloads: Vec<PathBuf>,
}

struct EngineInner {
    store: Arc<dyn IMetadataStore + Send + Sync>,
    transport: Arc<dyn ITransport + Send + Sync>,
    network: Arc<dyn INetworkState + Send + Sync>,
    auth: Arc<dyn IAuthentication + Send + Sync>,
    delegate: Arc<dyn ISyncDelegate + Send + Sync>,
    queue: ChangeQueue,
    mode: ModeTracker,
    timer: AutoCommitTimer,
    retry: RetryPolicy,
    stager: PayloadStager,
    flight: Mutex<FlightState>,
    store_lock: AsyncMutex<()>,
    connectivity: Mutex<Option<watch::Receiver<bool>>>,
    listener: Mutex<Option<NetworkListener>>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = listener {
            listener.cancel();
        }
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Handle to the engine
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Creates an engine over the given collaborators
    ///
    /// Nothing runs until [`launch`](Self::launch) or the first operation.
    pub fn new(
        store: Arc<dyn IMetadataStore + Send + Sync>,
        transport: Arc<dyn ITransport + Send + Sync>,
        network: Arc<dyn INetworkState + Send + Sync>,
        auth: Arc<dyn IAuthentication + Send + Sync>,
        delegate: Arc<dyn ISyncDelegate + Send + Sync>,
        settings: EngineSettings,
    ) -> Self {
        info!(
            auto_commit = settings.auto_commit_enabled,
            interval_ms = settings.auto_commit_interval.as_millis() as u64,
            max_attempts = settings.retry.max_attempts,
            "Creating sync engine"
        );
        let inner = EngineInner {
            queue: ChangeQueue::new(store.clone()),
            mode: ModeTracker::new(store.clone(), delegate.clone()),
            timer: AutoCommitTimer::new(
                settings.auto_commit_enabled,
                settings.auto_commit_interval,
            ),
            retry: settings.retry,
            stager: PayloadStager::new(settings.staging_dir),
            store,
            transport,
            network,
            auth,
            delegate,
            flight: Mutex::new(FlightState::default()),
            store_lock: AsyncMutex::new(()),
            connectivity: Mutex::new(None),
            listener: Mutex::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Subscribes the engine to connectivity changes
    ///
    /// The listener starts in [`launch`](Self::launch) and resumes work on
    /// every reconnect.
    pub fn with_connectivity_updates(self, rx: watch::Receiver<bool>) -> Self {
        *lock(&self.inner.connectivity) = Some(rx);
        self
    }

    /// Current mode
    pub fn mode(&self) -> EngineMode {
        self.inner.mode.current()
    }

    /// Returns true while a batch or remote check is in flight
    pub fn is_operating(&self) -> bool {
        self.flight().operating
    }

    // ========================================================================
    // Start-up
    // ========================================================================

    /// Restores the persisted mode and resumes interrupted work
    ///
    /// A persisted `Synchronizing` or `NetworkNotConnected` mode means the
    /// previous process stopped mid-cycle; the pending changes are committed
    /// again. An undecodable mode record puts the engine in `InternalError`.
    #[tracing::instrument(skip(self))]
    pub async fn launch(&self) -> Result<EngineMode, SyncError> {
        let restored = match self.inner.mode.restore().await {
            Ok(mode) => mode,
            Err(e) => return Err(self.internal_failure("restore_mode", e).await),
        };

        self.start_network_listener();

        match restored {
            EngineMode::Synchronizing | EngineMode::NetworkNotConnected => {
                info!(mode = restored.name(), "Previous run stopped mid-cycle");
                self.resume_with(RecoveryStage::ResumingAfterRestart).await?;
            }
            EngineMode::Idle => self.rearm_if_pending().await,
            _ => warn!(mode = %restored, "Launched in error mode; reset_from_error required"),
        }
        Ok(self.mode())
    }

    fn start_network_listener(&self) {
        let Some(rx) = lock(&self.inner.connectivity).take() else {
            return;
        };
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let listener = NetworkListener::spawn(rx, move || -> ReconnectTask {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let engine = SyncEngine { inner };
                if let Err(e) = engine.resume().await {
                    warn!(error = %e, "Resume after reconnect failed");
                }
            })
        });
        *lock(&self.inner.listener) = Some(listener);
    }

    // ========================================================================
    // Enqueue operations
    // ========================================================================

    /// Queues an upload of `payload` for `attrs.item_id`
    ///
    /// The first upload of an identifier needs a remote file name and a MIME
    /// type. With [`PayloadOwnership::Transfer`] the engine deletes the
    /// payload once the server confirms it.
    #[tracing::instrument(skip_all, fields(item_id = %attrs.item_id))]
    pub async fn upload_file(
        &self,
        payload: impl Into<PathBuf>,
        attrs: &SyncAttributes,
        ownership: PayloadOwnership,
    ) -> Result<(), SyncError> {
        let payload = payload.into();
        let result = {
            let _guard = self.inner.store_lock.lock().await;
            self.inner
                .queue
                .enqueue_upload(payload, attrs, ownership)
                .await
        };
        let enqueued = self.check_enqueue(result, "upload_file").await?;
        info!(item_id = %attrs.item_id, "Upload queued");
        self.after_enqueue(enqueued).await;
        Ok(())
    }

    /// Queues an upload the caller keeps ownership of
    pub async fn upload_immutable_file(
        &self,
        payload: impl Into<PathBuf>,
        attrs: &SyncAttributes,
    ) -> Result<(), SyncError> {
        self.upload_file(payload, attrs, PayloadOwnership::Retain)
            .await
    }

    /// Queues an upload whose payload the engine deletes after transfer
    pub async fn upload_temporary_file(
        &self,
        payload: impl Into<PathBuf>,
        attrs: &SyncAttributes,
    ) -> Result<(), SyncError> {
        self.upload_file(payload, attrs, PayloadOwnership::Transfer)
            .await
    }

    /// Stages `data` in the staging directory and queues it as an upload
    #[tracing::instrument(skip_all, fields(item_id = %attrs.item_id, bytes = data.len()))]
    pub async fn upload_data(&self, data: &[u8], attrs: &SyncAttributes) -> Result<(), SyncError> {
        let staged = match self.inner.stager.stage(data).await {
            Ok(path) => path,
            Err(e) => {
                let err = anyhow::Error::new(e).context("Failed to stage payload");
                return Err(self.internal_failure("upload_data", err).await);
            }
        };
        let result = self
            .upload_file(staged.clone(), attrs, PayloadOwnership::Transfer)
            .await;
        if result.is_err() {
            release_payload(&staged).await;
        }
        result
    }

    /// Queues a deletion of `item_id`, discarding its queued uploads
    ///
    /// An item the server never received is deleted locally and nothing is
    /// queued.
    #[tracing::instrument(skip(self))]
    pub async fn delete_file(&self, item_id: ItemId) -> Result<(), SyncError> {
        let result = {
            let _guard = self.inner.store_lock.lock().await;
            let in_flight = self.flight().in_flight_items.contains(&item_id);
            self.inner.queue.enqueue_deletion(item_id, in_flight).await
        };
        let enqueued = self.check_enqueue(result, "delete_file").await?;
        if enqueued.local_only {
            info!(item_id = %item_id, "Item never uploaded; deleted locally");
            self.release_replaced(enqueued.released_payloads).await;
            return Ok(());
        }
        info!(item_id = %item_id, "Deletion queued");
        self.after_enqueue(enqueued).await;
        Ok(())
    }

    async fn check_enqueue(
        &self,
        result: Result<Enqueued, QueueError>,
        operation: &'static str,
    ) -> Result<Enqueued, SyncError> {
        match result {
            Ok(enqueued) => Ok(enqueued),
            Err(QueueError::ClientApi(e)) => Err(self.client_api_failure(e).await),
            Err(QueueError::Store(e)) => Err(self.internal_failure(operation, e).await),
        }
    }

    async fn after_enqueue(&self, enqueued: Enqueued) {
        self.release_replaced(enqueued.released_payloads).await;
        self.arm_auto_commit();
    }

    /// Deletes replaced payloads, deferring those the current batch is sending
    async fn release_replaced(&self, payloads: Vec<PathBuf>) {
        let now: Vec<PathBuf> = {
            let mut flight = self.flight();
            let mut now = Vec::new();
            for path in payloads {
                if flight.in_flight_payloads.contains(&path) {
                    flight.orphaned_payloads.push(path);
                } else {
                    now.push(path);
                }
            }
            now
        };
        for path in &now {
            release_payload(path).await;
        }
    }

    // ========================================================================
    // Commit and remote check
    // ========================================================================

    /// Ships every pending change as one batch
    ///
    /// Returns immediately; completion is reported through the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self) -> Result<CommitOutcome, SyncError> {
        self.check_dispatch().await?;

        {
            let mut flight = self.flight();
            if flight.operating {
                flight.commit_queued = true;
                info!("Batch in flight, commit queued");
                return Ok(CommitOutcome::Queued);
            }
            flight.operating = true;
        }

        let pending = match self.inner.queue.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                self.release_flight();
                return Err(self.internal_failure("commit", e).await);
            }
        };
        if pending.is_empty() {
            self.settle_stale_mode().await;
            self.release_flight();
            debug!("Nothing to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        self.inner.timer.cancel();
        info!(items = pending.len(), "Commit started");
        self.spawn_worker(Job::Commit);
        Ok(CommitOutcome::Started)
    }

    /// Checks the server for new, newer and deleted items
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        self.check_dispatch().await?;

        {
            let mut flight = self.flight();
            if flight.operating {
                flight.sync_queued = true;
                info!("Batch in flight, remote check queued");
                return Ok(SyncOutcome::Queued);
            }
            flight.operating = true;
        }

        info!("Remote check started");
        self.spawn_worker(Job::Sync);
        Ok(SyncOutcome::Started)
    }

    async fn check_dispatch(&self) -> Result<(), SyncError> {
        if !self.inner.auth.is_signed_in() {
            return Err(self
                .client_api_failure(ClientApiError::UserNotSignedIn)
                .await);
        }
        let mode = self.mode();
        if mode.is_error() {
            return Err(SyncError::ErrorMode(mode));
        }
        Ok(())
    }

    /// Resumes queued work after connectivity returns
    ///
    /// Does nothing unless the engine is waiting for the network.
    pub async fn resume(&self) -> Result<(), SyncError> {
        if self.mode() != EngineMode::NetworkNotConnected {
            debug!(mode = %self.mode(), "Nothing to resume");
            return Ok(());
        }
        self.resume_with(RecoveryStage::NetworkReconnected).await
    }

    async fn resume_with(&self, stage: RecoveryStage) -> Result<(), SyncError> {
        if !self.inner.network.is_connected() {
            self.enter_offline().await;
            return Ok(());
        }
        if !self.inner.auth.is_signed_in() {
            warn!("No user signed in; not resuming");
            self.settle_stale_mode().await;
            return Ok(());
        }
        if !self.try_start_flight() {
            debug!("Worker already running");
            return Ok(());
        }

        info!(%stage, "Resuming");
        self.inner.delegate.on_recovery_progress(&stage);
        self.spawn_worker(Job::Commit);
        Ok(())
    }

    // ========================================================================
    // Error recovery
    // ========================================================================

    /// Leaves an error mode, keeping every pending change
    ///
    /// For non-recoverable and internal errors the transport's server-side
    /// state is reset first, under the retry policy; if that fails the engine
    /// stays in the error mode.
    #[tracing::instrument(skip(self))]
    pub async fn reset_from_error(&self) -> Result<(), SyncError> {
        let Some(error) = self.mode().error() else {
            return Err(SyncError::NotInErrorMode);
        };
        if self.is_operating() {
            return Err(SyncError::Busy);
        }

        if !matches!(error, EngineError::ClientApi(_)) {
            self.inner
                .delegate
                .on_recovery_progress(&RecoveryStage::ResettingServer { attempt: 1 });
            let result = with_retry(
                &self.inner.retry,
                "reset",
                |attempt, _| {
                    self.inner
                        .delegate
                        .on_recovery_progress(&RecoveryStage::ResettingServer { attempt })
                },
                || self.inner.transport.reset(),
            )
            .await;
            if let Err(e) = result {
                warn!(error = %e, "Server reset failed; staying in error mode");
                return Err(SyncError::ResetFailed(e.to_string()));
            }
        }

        let orphaned = {
            let mut flight = self.flight();
            flight.commit_queued = false;
            flight.sync_queued = false;
            flight.in_flight_payloads.clear();
            flight.in_flight_items.clear();
            std::mem::take(&mut flight.orphaned_payloads)
        };
        for path in &orphaned {
            release_payload(path).await;
        }

        if let Err(e) = self.inner.mode.set(EngineMode::Idle).await {
            return Err(self.internal_failure("reset_from_error", e).await);
        }
        info!(error = %error, "Recovered from error mode");
        self.rearm_if_pending().await;
        Ok(())
    }

    // ========================================================================
    // Queries and settings
    // ========================================================================

    /// Attributes of a tracked item, with its `deleted` flag
    pub async fn local_file_status(
        &self,
        item_id: ItemId,
    ) -> Result<Option<SyncAttributes>, SyncError> {
        match self.inner.store.find(&item_id).await {
            Ok(record) => Ok(record.map(|r| r.attributes())),
            Err(e) => Err(self.internal_failure("local_file_status", e).await),
        }
    }

    /// Records with pending changes, oldest first
    pub async fn pending_changes(&self) -> Result<Vec<LocalFileMetadata>, SyncError> {
        match self.inner.queue.pending().await {
            Ok(pending) => Ok(pending),
            Err(e) => Err(self.internal_failure("pending_changes", e).await),
        }
    }

    /// Enables or disables auto-commit
    pub async fn set_auto_commit(&self, enabled: bool) {
        info!(enabled, "Auto-commit setting changed");
        self.inner.timer.set_enabled(enabled);
        if enabled {
            self.rearm_if_pending().await;
        }
    }

    /// Sets the auto-commit interval used from the next enqueue on
    pub async fn set_auto_commit_interval(&self, seconds: f64) -> Result<(), SyncError> {
        match AutoCommitTimer::interval_from_secs(seconds) {
            Ok(interval) => {
                self.inner.timer.set_interval(interval);
                info!(seconds, "Auto-commit interval changed");
                Ok(())
            }
            Err(e) => Err(self.client_api_failure(e).await),
        }
    }

    /// Development reset of local metadata; never touches the network
    ///
    /// Returns the number of records affected. Refused while a batch or
    /// remote check is in flight.
    #[tracing::instrument(skip(self))]
    pub async fn reset_metadata(&self, scope: MetadataResetScope) -> Result<u64, SyncError> {
        if self.is_operating() {
            return Err(SyncError::Busy);
        }
        let result = {
            let _guard = self.inner.store_lock.lock().await;
            self.apply_metadata_reset(scope).await
        };
        match result {
            Ok((affected, released)) => {
                for path in &released {
                    release_payload(path).await;
                }
                warn!(?scope, affected, "Metadata reset");
                Ok(affected)
            }
            Err(e) => Err(self.internal_failure("reset_metadata", e).await),
        }
    }

    async fn apply_metadata_reset(
        &self,
        scope: MetadataResetScope,
    ) -> anyhow::Result<(u64, Vec<PathBuf>)> {
        let store = &self.inner.store;
        match scope {
            MetadataResetScope::All => {
                let released = owned_payloads(&store.list_all().await?);
                let removed = store.remove_all().await?;
                Ok((removed, released))
            }
            MetadataResetScope::Item(item_id, kind) => {
                let Some(mut record) = store.find(&item_id).await? else {
                    return Ok((0, Vec::new()));
                };
                if kind == ResetKind::DeleteMetadata {
                    let released = owned_payloads(std::slice::from_ref(&record));
                    store.remove(&item_id).await?;
                    return Ok((1, released));
                }
                record.apply_reset(kind);
                store.save(&record).await?;
                Ok((1, Vec::new()))
            }
        }
    }

    // ========================================================================
    // Worker
    // ========================================================================

    fn spawn_worker(&self, job: Job) {
        let engine = self.clone();
        let task: Pin<Box<dyn Future<Output = ()> + Send>> =
            Box::pin(async move { engine.run_worker(job).await });
        tokio::spawn(task);
    }

    async fn run_worker(&self, first: Job) {
        let mut job = first;
        let last_end = loop {
            let end = match job {
                Job::Commit => self.run_commit().await,
                Job::Sync => self.run_sync().await,
            };
            match self.next_job(end) {
                Some(next) => {
                    debug!(?next, "Running queued job");
                    job = next;
                }
                None => break end,
            }
        };

        if last_end == CycleEnd::Completed {
            self.rearm_if_pending().await;
        }
    }

    /// Picks the queued job to run next, or releases the flight
    fn next_job(&self, end: CycleEnd) -> Option<Job> {
        let mut flight = self.flight();
        let next = match end {
            CycleEnd::Halted => {
                flight.commit_queued = false;
                flight.sync_queued = false;
                None
            }
            CycleEnd::Completed if flight.commit_queued => {
                flight.commit_queued = false;
                Some(Job::Commit)
            }
            CycleEnd::Completed if flight.sync_queued => {
                flight.sync_queued = false;
                Some(Job::Sync)
            }
            CycleEnd::Completed => None,
        };
        if next.is_none() {
            flight.operating = false;
        }
        next
    }

    /// Releases a flight taken by `commit` that spawned no worker
    fn release_flight(&self) {
        if let Some(job) = self.next_job(CycleEnd::Completed) {
            self.spawn_worker(job);
        }
    }

    fn try_start_flight(&self) -> bool {
        let mut flight = self.flight();
        if flight.operating {
            return false;
        }
        flight.operating = true;
        true
    }

    /// Clears the in-flight payload set, returning payloads orphaned meanwhile
    fn land_flight(&self) -> Vec<PathBuf> {
        let mut flight = self.flight();
        flight.in_flight_payloads.clear();
        std::mem::take(&mut flight.orphaned_payloads)
    }

    async fn run_commit(&self) -> CycleEnd {
        let snapshot = {
            let _guard = self.inner.store_lock.lock().await;
            let snapshot = self.inner.queue.snapshot().await;
            if let Ok(pending) = &snapshot {
                self.flight().in_flight_items =
                    pending.batch.items.iter().map(|i| i.item_id).collect();
            }
            snapshot
        };
        let pending = match snapshot {
            Ok(pending) => pending,
            Err(e) => {
                self.internal_failure("snapshot", e).await;
                return CycleEnd::Halted;
            }
        };
        if pending.batch.is_empty() {
            return self.finish_cycle().await;
        }
        if !self.inner.network.is_connected() {
            self.flight().in_flight_items.clear();
            self.enter_offline().await;
            return CycleEnd::Halted;
        }
        if let Err(e) = self.inner.mode.set(EngineMode::Synchronizing).await {
            self.flight().in_flight_items.clear();
            self.internal_failure("set_mode", e).await;
            return CycleEnd::Halted;
        }

        self.flight().in_flight_payloads = pending.owned_payloads.iter().cloned().collect();
        let batch = &pending.batch;
        info!(items = batch.len(), "Submitting batch");
        let result = with_retry(
            &self.inner.retry,
            "submit_batch",
            |attempt, delay| self.report_retry("submit_batch", attempt, delay),
            || self.inner.transport.submit_batch(batch),
        )
        .await;
        let orphaned = self.land_flight();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.flight().in_flight_items.clear();
                for path in &orphaned {
                    release_payload(path).await;
                }
                self.transport_failure("submit_batch", failure).await;
                return CycleEnd::Halted;
            }
        };

        let still_pending = match self.apply_batch_outcome(batch, &outcome).await {
            Ok(still_pending) => still_pending,
            Err(e) => {
                self.flight().in_flight_items.clear();
                for path in &orphaned {
                    release_payload(path).await;
                }
                self.internal_failure("apply_batch_outcome", e).await;
                return CycleEnd::Halted;
            }
        };
        for path in pending
            .owned_payloads
            .iter()
            .chain(orphaned.iter())
            .filter(|p| !still_pending.contains(*p))
        {
            release_payload(path).await;
        }

        self.notify_batch(&outcome);
        info!(operations = outcome.operation_count(), "Batch committed");
        self.finish_cycle().await
    }

    /// Acknowledges the shipped changes and records the server's results
    ///
    /// Every touched record is reloaded, so changes enqueued while the batch
    /// was in flight survive. All records are written in one transaction.
    /// Returns the engine-owned payloads still referenced by pending changes.
    async fn apply_batch_outcome(
        &self,
        batch: &CommitBatch,
        outcome: &BatchOutcome,
    ) -> anyhow::Result<HashSet<PathBuf>> {
        let shipped = batch.change_ids();
        let _guard = self.inner.store_lock.lock().await;

        let mut updated: Vec<LocalFileMetadata> = Vec::new();
        for item in &batch.items {
            if updated.iter().any(|r| r.item_id() == item.item_id) {
                continue;
            }
            match self.inner.store.find(&item.item_id).await? {
                Some(mut record) => {
                    record.acknowledge(&shipped);
                    updated.push(record);
                }
                None => warn!(item_id = %item.item_id, "Committed item has no metadata record"),
            }
        }

        for result in &outcome.items {
            let Some(record) = updated.iter_mut().find(|r| r.item_id() == result.item_id()) else {
                warn!(item_id = %result.item_id(), "Outcome for an item outside the batch");
                continue;
            };
            match result {
                ItemOutcome::Uploaded { version, .. } => record.mark_uploaded(*version),
                ItemOutcome::Deleted { .. } => record.mark_deleted_on_server(),
            }
        }

        self.inner.store.save_batch(&updated).await?;
        self.flight().in_flight_items.clear();
        Ok(owned_payloads(&updated).into_iter().collect())
    }

    /// Per-item notifications in transport order, then the aggregate
    fn notify_batch(&self, outcome: &BatchOutcome) {
        let delegate = &self.inner.delegate;
        let mut deletions: Vec<ItemId> = Vec::new();
        for item in &outcome.items {
            match item {
                ItemOutcome::Uploaded { item_id, .. } => {
                    if !deletions.is_empty() {
                        delegate.on_deletions_sent(&deletions);
                        deletions.clear();
                    }
                    delegate.on_single_upload_complete(*item_id);
                }
                ItemOutcome::Deleted { item_id } => deletions.push(*item_id),
            }
        }
        if !deletions.is_empty() {
            delegate.on_deletions_sent(&deletions);
        }
        delegate.on_commit_complete(outcome.operation_count());
    }

    async fn run_sync(&self) -> CycleEnd {
        if !self.inner.network.is_connected() {
            self.enter_offline().await;
            return CycleEnd::Halted;
        }
        if let Err(e) = self.inner.mode.set(EngineMode::Synchronizing).await {
            self.internal_failure("set_mode", e).await;
            return CycleEnd::Halted;
        }

        let index = match with_retry(
            &self.inner.retry,
            "current_file_index",
            |attempt, delay| self.report_retry("current_file_index", attempt, delay),
            || self.inner.transport.current_file_index(),
        )
        .await
        {
            Ok(index) => index,
            Err(failure) => {
                self.transport_failure("current_file_index", failure).await;
                return CycleEnd::Halted;
            }
        };
        debug!(entries = index.len(), "Fetched remote file index");

        let mut wanted = Vec::new();
        for entry in index {
            let known = match self.inner.store.find(&entry.item_id).await {
                Ok(known) => known,
                Err(e) => {
                    self.internal_failure("sync", e).await;
                    return CycleEnd::Halted;
                }
            };
            match plan_entry(known.as_ref(), &entry) {
                RemoteAction::Download | RemoteAction::MarkDeleted => wanted.push(entry),
                RemoteAction::Conflict => {
                    warn!(item_id = %entry.item_id, "Remote change skipped; local changes pending")
                }
                RemoteAction::UpToDate => {}
            }
        }

        let mut fetched: Vec<(RemoteFileEntry, Option<PathBuf>)> = Vec::new();
        for entry in wanted {
            if entry.deleted {
                fetched.push((entry, None));
                continue;
            }
            let result = with_retry(
                &self.inner.retry,
                "download",
                |attempt, delay| self.report_retry("download", attempt, delay),
                || self.inner.transport.download(&entry),
            )
            .await;
            match result {
                Ok(path) => fetched.push((entry, Some(path))),
                Err(failure) => {
                    self.transport_failure("download", failure).await;
                    return CycleEnd::Halted;
                }
            }
        }

        let (downloads, deletions) = match self.apply_remote_changes(fetched).await {
            Ok(applied) => applied,
            Err(e) => {
                self.internal_failure("sync", e).await;
                return CycleEnd::Halted;
            }
        };

        let delegate = &self.inner.delegate;
        for (path, attrs) in &downloads {
            delegate.on_single_download_complete(path, attrs);
        }
        if !downloads.is_empty() {
            delegate.on_all_downloads_complete();
        }
        for item_id in &deletions {
            delegate.on_deletion_received(*item_id);
        }
        info!(
            downloads = downloads.len(),
            deletions = deletions.len(),
            "Remote check complete"
        );
        self.finish_cycle().await
    }

    /// Records downloads and remote deletions in one transaction
    ///
    /// Entries whose record gained pending changes during the check are skipped.
    async fn apply_remote_changes(
        &self,
        fetched: Vec<(RemoteFileEntry, Option<PathBuf>)>,
    ) -> anyhow::Result<(Vec<(PathBuf, SyncAttributes)>, Vec<ItemId>)> {
        let _guard = self.inner.store_lock.lock().await;

        let mut records = Vec::new();
        let mut downloads = Vec::new();
        let mut deletions = Vec::new();
        for (entry, path) in fetched {
            let known = self.inner.store.find(&entry.item_id).await?;
            match (plan_entry(known.as_ref(), &entry), path, known) {
                (RemoteAction::Download, Some(path), known) => {
                    let mut record = match known {
                        Some(record) => record,
                        None => LocalFileMetadata::from_attributes(&entry.attributes())?,
                    };
                    record.mark_downloaded(entry.version);
                    downloads.push((path, record.attributes()));
                    records.push(record);
                }
                (RemoteAction::MarkDeleted, _, Some(mut record)) => {
                    record.mark_deleted_on_server();
                    deletions.push(entry.item_id);
                    records.push(record);
                }
                (action, _, _) => {
                    debug!(item_id = %entry.item_id, ?action, "Remote entry changed during check; skipped")
                }
            }
        }

        self.inner.store.save_batch(&records).await?;
        Ok((downloads, deletions))
    }

    /// Ends a successful cycle in `Idle`, unless an error mode was entered meanwhile
    async fn finish_cycle(&self) -> CycleEnd {
        match self.inner.mode.set_unless_error(EngineMode::Idle).await {
            Ok(true) => CycleEnd::Completed,
            Ok(false) => CycleEnd::Halted,
            Err(e) => {
                self.internal_failure("set_mode", e).await;
                CycleEnd::Halted
            }
        }
    }

    // ========================================================================
    // Timer
    // ========================================================================

    fn arm_auto_commit(&self) {
        if self.is_operating() || self.mode().is_error() {
            return;
        }
        self.inner.timer.arm(self.auto_commit_task());
    }

    async fn rearm_if_pending(&self) {
        if !self.inner.timer.is_enabled() {
            return;
        }
        match self.inner.queue.pending().await {
            Ok(pending) if !pending.is_empty() => self.arm_auto_commit(),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not check pending changes for auto-commit"),
        }
    }

    fn auto_commit_task(&self) -> TimerTask {
        let engine = self.clone();
        Box::pin(async move {
            match engine.commit().await {
                Ok(outcome) => debug!(?outcome, "Auto-commit"),
                Err(e) => warn!(error = %e, "Auto-commit failed"),
            }
        })
    }

    // ========================================================================
    // Failure handling
    // ========================================================================

    fn report_retry(&self, operation: &str, attempt: u32, delay: Duration) {
        self.inner
            .delegate
            .on_recovery_progress(&RecoveryStage::Retrying {
                operation: operation.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
    }

    async fn transport_failure(&self, operation: &'static str, failure: RetryError) {
        let error = match failure {
            RetryError::Exhausted { attempts, last, .. } => EngineError::NonRecoverable(
                ErrorDetail::new(last.to_string())
                    .with_operation(operation)
                    .with_attempts(attempts),
            ),
            RetryError::Failed(TransportError::NetworkUnavailable(reason)) => {
                warn!(operation, %reason, "Connectivity lost during transfer");
                self.enter_offline().await;
                return;
            }
            RetryError::Failed(TransportError::Rejected(reason)) => {
                EngineError::NonRecoverable(ErrorDetail::new(reason).with_operation(operation))
            }
            RetryError::Failed(other) => {
                EngineError::Internal(ErrorDetail::new(other.to_string()).with_operation(operation))
            }
        };
        error!(operation, error = %error, "Transport failure");
        self.enter_error(error).await;
    }

    /// Settles to `Idle` when nothing is in flight but the mode says otherwise
    ///
    /// `NetworkNotConnected` only settles once the network is back.
    async fn settle_stale_mode(&self) {
        let stale = match self.mode() {
            EngineMode::Synchronizing => true,
            EngineMode::NetworkNotConnected => self.inner.network.is_connected(),
            _ => false,
        };
        if stale {
            info!(mode = %self.mode(), "No work under way; settling to idle");
            let _ = self.inner.mode.set_unless_error(EngineMode::Idle).await;
        }
    }

    async fn enter_offline(&self) {
        warn!("Network not connected; waiting for reconnect");
        // Persistence failures are logged by the tracker
        let _ = self
            .inner
            .mode
            .set_unless_error(EngineMode::NetworkNotConnected)
            .await;
    }

    async fn enter_error(&self, error: EngineError) {
        let _ = self.inner.mode.set(error.mode()).await;
        self.inner.delegate.on_error(&error);
    }

    async fn client_api_failure(&self, error: ClientApiError) -> SyncError {
        warn!(error = %error, "Client API error");
        self.enter_error(EngineError::ClientApi(error.clone())).await;
        SyncError::ClientApi(error)
    }

    async fn internal_failure(&self, operation: &'static str, err: anyhow::Error) -> SyncError {
        let detail = ErrorDetail::new(format!("{err:#}")).with_operation(operation);
        error!(operation, error = %detail, "Internal error");
        self.enter_error(EngineError::Internal(detail.clone())).await;
        SyncError::Internal(detail.to_string())
    }

    fn flight(&self) -> MutexGuard<'_, FlightState> {
        lock(&self.inner.flight)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Engine-owned payloads referenced by the records' pending changes
fn owned_payloads(records: &[LocalFileMetadata]) -> Vec<PathBuf> {
    records
        .iter()
        .flat_map(|r| r.pending_changes())
        .filter_map(|c| c.owned_payload())
        .map(Path::to_path_buf)
        .collect()
}
