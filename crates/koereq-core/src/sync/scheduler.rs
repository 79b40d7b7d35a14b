//! Decides when the engine runs.
//!
//! Triggers: a save (submit that record if online), an offline to online
//! transition, a periodic tick while records are pending, and manual
//! requests. Every trigger goes through the engine, so its gate still
//! serializes all submissions.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SyncConfig;
use crate::models::{MedicalRequest, RecordOutcome, SyncOutcome, SyncResult};
use crate::store::{RequestStore, StoreResult};

use super::engine::{SyncEngine, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    /// A record was saved locally.
    Saved(String),
    /// The host asked for a full run.
    Manual,
}

/// Cloneable front door to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    triggers: mpsc::UnboundedSender<SyncTrigger>,
    store: Arc<RequestStore>,
    results: broadcast::Sender<SyncResult>,
}

impl SchedulerHandle {
    /// Tell the scheduler a record was saved. Returns false once the
    /// scheduler has stopped.
    pub fn notify_saved(&self, id: impl Into<String>) -> bool {
        self.triggers.send(SyncTrigger::Saved(id.into())).is_ok()
    }

    /// Ask for a full run.
    pub fn request_sync(&self) -> bool {
        self.triggers.send(SyncTrigger::Manual).is_ok()
    }

    /// Save through the store, then notify.
    pub fn save(&self, request: &MedicalRequest) -> StoreResult<MedicalRequest> {
        let saved = self.store.save(request)?;
        self.notify_saved(saved.id.clone());
        Ok(saved)
    }

    /// Counts of every run the scheduler performs. Single-record
    /// submissions report as a run of one.
    pub fn subscribe_results(&self) -> broadcast::Receiver<SyncResult> {
        self.results.subscribe()
    }
}

pub struct Scheduler {
    engine: Arc<SyncEngine>,
    triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    reachability: watch::Receiver<bool>,
    was_connected: bool,
    period: std::time::Duration,
    results: broadcast::Sender<SyncResult>,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, config: &SyncConfig) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (results, _) = broadcast::channel(32);
        let mut reachability = engine.reachability().subscribe();
        let was_connected = *reachability.borrow_and_update();

        let handle = SchedulerHandle {
            triggers: tx,
            store: Arc::clone(engine.store()),
            results: results.clone(),
        };
        let scheduler = Self {
            engine,
            triggers: rx,
            reachability,
            was_connected,
            period: config.periodic_interval(),
            results,
        };
        (scheduler, handle)
    }

    /// Run until `shutdown` changes or its sender is dropped.
    ///
    /// A run in progress finishes before shutdown is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut monitor_alive = true;

        info!(period_secs = self.period.as_secs(), "Scheduler started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                changed = self.reachability.changed(), if monitor_alive => {
                    if changed.is_err() {
                        debug!("Reachability monitor dropped");
                        monitor_alive = false;
                        continue;
                    }
                    let connected = *self.reachability.borrow_and_update();
                    let reconnected = connected && !self.was_connected;
                    self.was_connected = connected;
                    if reconnected {
                        info!("Back online, syncing pending requests");
                        self.run_all().await;
                    }
                }

                Some(trigger) = self.triggers.recv() => match trigger {
                    SyncTrigger::Saved(id) => self.run_one(&id).await,
                    SyncTrigger::Manual => self.run_all().await,
                },

                _ = ticker.tick() => {
                    if self.engine.reachability().is_connected() && self.has_pending() {
                        debug!("Periodic sync");
                        self.run_all().await;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    fn has_pending(&self) -> bool {
        match self.engine.store().pending_count() {
            Ok(count) => count > 0,
            Err(e) => {
                error!(error = %e, "Could not count pending requests");
                false
            }
        }
    }

    async fn run_all(&self) {
        match self.engine.sync_all().await {
            Ok(SyncOutcome::Completed(result)) => self.publish(result),
            Ok(SyncOutcome::AlreadyRunning) => {}
            Err(SyncError::NetworkUnavailable) => debug!("Skipped sync, offline"),
            Err(e) => error!(error = %e, "Sync run failed"),
        }
    }

    async fn run_one(&self, id: &str) {
        if !self.engine.reachability().is_connected() {
            debug!(id = %id, "Saved while offline, left pending");
            return;
        }
        match self.engine.sync_one(id).await {
            Ok(RecordOutcome::Synced) => self.publish(SyncResult::new(1, 0)),
            Ok(RecordOutcome::Failed(_)) => self.publish(SyncResult::new(0, 1)),
            Ok(RecordOutcome::AlreadySynced | RecordOutcome::NotFound) => {}
            Err(SyncError::NetworkUnavailable) => debug!(id = %id, "Went offline before submit"),
            Err(e) => error!(id = %id, error = %e, "Sync of saved request failed"),
        }
    }

    fn publish(&self, result: SyncResult) {
        // No subscribers is fine.
        let _ = self.results.send(result);
    }
}
