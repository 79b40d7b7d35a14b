//! Sync engine: moves pending requests to synced, one submission per record.
//!
//! At most one run is in flight per engine. `sync_all` coalesces into a
//! running run instead of waiting; `sync_one` waits for the gate, so no call
//! site ever submits concurrently with another.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::models::{MedicalRequest, RecordOutcome, SyncOutcome, SyncResult};
use crate::store::{PersistenceError, RequestStore};

use super::reachability::ReachabilityMonitor;
use super::remote::{RemoteClient, SubmitError};

/// Failures that stop a sync call. Per-record failures are not errors;
/// they are counted in [`SyncResult::failure_count`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("sync failed: {0}")]
    Remote(String),
}

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
}

/// Publishes `Running` while alive and `Idle` once dropped, so every exit
/// path of a run leaves the engine idle.
struct RunningGuard<'a> {
    state: &'a watch::Sender<RunState>,
}

impl<'a> RunningGuard<'a> {
    fn enter(state: &'a watch::Sender<RunState>) -> Self {
        state.send_replace(RunState::Running);
        Self { state }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(RunState::Idle);
    }
}

/// Orchestrates submission of pending requests.
pub struct SyncEngine {
    store: Arc<RequestStore>,
    remote: Arc<dyn RemoteClient>,
    reachability: Arc<dyn ReachabilityMonitor>,
    submit_timeout: Duration,
    /// Held for the whole of every run; the only path to the remote client.
    gate: Mutex<()>,
    state: watch::Sender<RunState>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<RequestStore>,
        remote: Arc<dyn RemoteClient>,
        reachability: Arc<dyn ReachabilityMonitor>,
        config: &SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            store,
            remote,
            reachability,
            submit_timeout: config.submit_timeout(),
            gate: Mutex::new(()),
            state,
        }
    }

    pub fn store(&self) -> &Arc<RequestStore> {
        &self.store
    }

    pub fn reachability(&self) -> &Arc<dyn ReachabilityMonitor> {
        &self.reachability
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Observe run state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Attempt every currently pending request once.
    ///
    /// Records saved after the pending snapshot is taken wait for the next
    /// run. Failed records stay pending; there is no retry within a run.
    pub async fn sync_all(&self) -> Result<SyncOutcome, SyncError> {
        if !self.reachability.is_connected() {
            debug!("Sync requested while offline");
            return Err(SyncError::NetworkUnavailable);
        }

        let Ok(_gate) = self.gate.try_lock() else {
            debug!("Sync already running, coalescing trigger");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        let _running = RunningGuard::enter(&self.state);

        let batch = self.store.pending()?;
        info!(pending = batch.len(), "Sync run started");

        let mut result = SyncResult::default();
        for request in &batch {
            match self.submit(request).await {
                Ok(()) => {
                    self.acknowledge(request)?;
                    result.success_count += 1;
                }
                Err(e) if e.is_batch_level() => {
                    warn!(
                        id = %request.id,
                        error = %e,
                        synced = result.success_count,
                        "Sync run aborted by batch-level failure"
                    );
                    return Err(SyncError::Remote(e.to_string()));
                }
                Err(e) => {
                    warn!(
                        id = %request.id,
                        error = %e,
                        "Submission failed, request stays pending"
                    );
                    result.failure_count += 1;
                }
            }
        }

        // The acknowledgments are already durable; only the summary is lost.
        if let Err(e) = self.store.record_sync(result) {
            error!(error = %e, "Could not record sync summary");
        }
        info!(
            success = result.success_count,
            failure = result.failure_count,
            "Sync run finished"
        );
        Ok(SyncOutcome::Completed(result))
    }

    /// Submit a single request, typically right after it was saved.
    ///
    /// Waits for any in-flight run, then re-reads the record so a request
    /// that run already synced is not submitted twice.
    pub async fn sync_one(&self, id: &str) -> Result<RecordOutcome, SyncError> {
        if !self.reachability.is_connected() {
            return Err(SyncError::NetworkUnavailable);
        }

        let _gate = self.gate.lock().await;
        let _running = RunningGuard::enter(&self.state);

        let Some(request) = self.store.get(id)? else {
            return Ok(RecordOutcome::NotFound);
        };
        if request.is_synced() {
            return Ok(RecordOutcome::AlreadySynced);
        }

        match self.submit(&request).await {
            Ok(()) => {
                self.acknowledge(&request)?;
                debug!(id = %id, "Request synced");
                Ok(RecordOutcome::Synced)
            }
            Err(e) if e.is_batch_level() => Err(SyncError::Remote(e.to_string())),
            Err(e) => {
                warn!(id = %id, error = %e, "Submission failed, request stays pending");
                Ok(RecordOutcome::Failed(e.to_string()))
            }
        }
    }

    async fn submit(&self, request: &MedicalRequest) -> Result<(), SubmitError> {
        match tokio::time::timeout(self.submit_timeout, self.remote.submit(request)).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Timeout),
        }
    }

    /// Mark the submitted revision synced. A save that landed during the
    /// submission keeps the record pending for the next run.
    fn acknowledge(&self, request: &MedicalRequest) -> Result<(), PersistenceError> {
        if !self.store.mark_synced_revision(&request.id, request.revision)? {
            debug!(
                id = %request.id,
                revision = request.revision,
                "Request changed or removed during submission, left as is"
            );
        }
        Ok(())
    }
}
