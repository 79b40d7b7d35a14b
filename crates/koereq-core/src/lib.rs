//! Koereq Core Library
//!
//! Offline-first capture of spoken medical requests with background sync to
//! a remote request service.
//!
//! # Architecture
//!
//! ```text
//! Voice capture → Transcription → NewMedicalRequest::into_request
//!                                          │
//!                                 RequestStore::save  (always Pending)
//!                                          │
//!                        ┌─────────────────┼─────────────────┐
//!                        │                 │                 │
//!                     on save          reconnect        periodic tick
//!                     (online)       offline→online    (pending > 0)
//!                        │                 │                 │
//!                        ▼                 ▼                 ▼
//!                   sync_one(id)      sync_all()        sync_all()
//!                        └─────────────────┼─────────────────┘
//!                                          │
//!                              SyncEngine gate (one run)
//!                                          │
//!                              RemoteClient::submit
//!                                          │
//!                       ack → Synced      failure → stays Pending
//! ```
//!
//! # Core Principle
//!
//! **A saved request is never lost.** It stays in local storage as pending
//! until the remote acknowledges the exact revision that was submitted.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence
//! - [`models`]: Domain types (MedicalRequest, SyncResult, etc.)
//! - [`store`]: Thread-safe record store
//! - [`sync`]: Remote client, reachability, sync engine and scheduler
//! - [`config`]: Sync configuration

pub mod config;
pub mod db;
pub mod models;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::{ConfigError, SyncConfig};
pub use db::Database;
pub use models::{
    LastSync, MedicalRequest, NewMedicalRequest, RecordOutcome, SyncOutcome, SyncResult,
    SyncState, ValidationError,
};
pub use store::{PersistenceError, RequestStore};
pub use sync::{
    HttpRemoteClient, ManualReachability, ProbeReachability, ReachabilityMonitor, RemoteClient,
    RunState, Scheduler, SchedulerHandle, SubmitError, SyncEngine, SyncError,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::SecondsFormat;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum KoereqError {
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Remote error: {0}")]
    RemoteError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<PersistenceError> for KoereqError {
    fn from(e: PersistenceError) -> Self {
        KoereqError::PersistenceError(e.0)
    }
}

impl From<ValidationError> for KoereqError {
    fn from(e: ValidationError) -> Self {
        KoereqError::InvalidInput(e.to_string())
    }
}

impl From<ConfigError> for KoereqError {
    fn from(e: ConfigError) -> Self {
        KoereqError::InvalidInput(e.to_string())
    }
}

impl From<SyncError> for KoereqError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Persistence(p) => p.into(),
            SyncError::NetworkUnavailable => KoereqError::NetworkUnavailable,
            SyncError::Remote(cause) => KoereqError::RemoteError(cause),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for KoereqError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        KoereqError::SyncError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Host-provided remote client
// =========================================================================

/// Submission failure reported by a host remote client.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiSubmitError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<uniffi::UnexpectedUniFFICallbackError> for FfiSubmitError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        FfiSubmitError::Network(e.reason)
    }
}

impl From<FfiSubmitError> for SubmitError {
    fn from(e: FfiSubmitError) -> Self {
        match e {
            FfiSubmitError::Rejected(reason) => SubmitError::Rejected(reason),
            FfiSubmitError::Network(reason) => SubmitError::Network(reason),
            FfiSubmitError::Unauthorized(reason) => SubmitError::Unauthorized(reason),
        }
    }
}

/// Remote submission implemented by the host (Swift/Kotlin).
///
/// Called from a background thread; blocking is fine.
#[uniffi::export(callback_interface)]
pub trait FfiRemoteClient: Send + Sync {
    fn submit(&self, request: FfiMedicalRequest) -> Result<(), FfiSubmitError>;
}

/// Adapts a blocking host client to [`RemoteClient`].
struct ForeignRemoteClient {
    inner: Arc<Box<dyn FfiRemoteClient>>,
}

#[async_trait]
impl RemoteClient for ForeignRemoteClient {
    async fn submit(&self, request: &MedicalRequest) -> Result<(), SubmitError> {
        let inner = Arc::clone(&self.inner);
        let request = FfiMedicalRequest::from(request.clone());
        match tokio::task::spawn_blocking(move || inner.submit(request)).await {
            Ok(result) => result.map_err(SubmitError::from),
            Err(e) => Err(SubmitError::Network(format!("Host client failed: {}", e))),
        }
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a store at the given path, submitting through `remote`.
///
/// `config_json` may be `None` for defaults.
#[uniffi::export]
pub fn open_request_store(
    path: String,
    config_json: Option<String>,
    remote: Box<dyn FfiRemoteClient>,
) -> Result<Arc<KoereqCore>, KoereqError> {
    let config = parse_config(config_json)?;
    let store = RequestStore::open(&path)?;
    KoereqCore::build(store, foreign_remote(remote), config)
}

/// Open or create a store that submits over HTTP to `remote_base_url`.
#[uniffi::export]
pub fn open_request_store_http(
    path: String,
    config_json: String,
) -> Result<Arc<KoereqCore>, KoereqError> {
    let config = SyncConfig::from_json(&config_json)?;
    let remote = HttpRemoteClient::from_config(&config)
        .ok_or_else(|| KoereqError::InvalidInput("remote_base_url is required".into()))?
        .map_err(|e| KoereqError::InvalidInput(e.to_string()))?;
    let store = RequestStore::open(&path)?;
    KoereqCore::build(store, Arc::new(remote), config)
}

/// Create an in-memory store (for testing).
#[uniffi::export]
pub fn open_request_store_in_memory(
    remote: Box<dyn FfiRemoteClient>,
) -> Result<Arc<KoereqCore>, KoereqError> {
    let store = RequestStore::open_in_memory()?;
    KoereqCore::build(store, foreign_remote(remote), SyncConfig::default())
}

/// Install a `tracing` subscriber writing to stderr.
///
/// `filter` uses `RUST_LOG` syntax, e.g. `"koereq_core=debug"`. Returns
/// false if a subscriber was already installed.
#[uniffi::export]
pub fn init_logging(filter: String) -> Result<bool, KoereqError> {
    let filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .map_err(|e| KoereqError::InvalidInput(e.to_string()))?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok())
}

fn parse_config(config_json: Option<String>) -> Result<SyncConfig, KoereqError> {
    match config_json {
        Some(json) => Ok(SyncConfig::from_json(&json)?),
        None => Ok(SyncConfig::default()),
    }
}

fn foreign_remote(remote: Box<dyn FfiRemoteClient>) -> Arc<dyn RemoteClient> {
    Arc::new(ForeignRemoteClient {
        inner: Arc::new(remote),
    })
}

// =========================================================================
// Main API Object
// =========================================================================

struct RunningScheduler {
    handle: SchedulerHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Store, engine and scheduler behind one FFI object.
///
/// Starts offline; the host reports connectivity with `set_connected`
/// unless a probe address is configured.
#[derive(uniffi::Object)]
pub struct KoereqCore {
    runtime: Runtime,
    engine: Arc<SyncEngine>,
    reachability: Arc<ManualReachability>,
    config: SyncConfig,
    scheduler: Mutex<Option<RunningScheduler>>,
}

impl KoereqCore {
    fn build(
        store: RequestStore,
        remote: Arc<dyn RemoteClient>,
        config: SyncConfig,
    ) -> Result<Arc<Self>, KoereqError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("koereq-sync")
            .enable_all()
            .build()
            .map_err(|e| KoereqError::SyncError(format!("Could not start runtime: {}", e)))?;
        let reachability = Arc::new(ManualReachability::new(false));
        let engine = Arc::new(SyncEngine::new(
            Arc::new(store),
            remote,
            reachability.clone(),
            &config,
        ));
        Ok(Arc::new(Self {
            runtime,
            engine,
            reachability,
            config,
            scheduler: Mutex::new(None),
        }))
    }

    fn store(&self) -> &RequestStore {
        self.engine.store()
    }

    /// Tell a running scheduler about a save.
    fn notify_saved(&self, id: &str) -> Result<(), KoereqError> {
        if let Some(running) = self.scheduler.lock()?.as_ref() {
            running.handle.notify_saved(id);
        }
        Ok(())
    }
}

#[uniffi::export]
impl KoereqCore {
    // =========================================================================
    // Request Operations
    // =========================================================================

    /// Capture a new request. Saved as pending; synced in the background
    /// when the scheduler runs and the device is online.
    pub fn create_request(
        &self,
        patient_name: String,
        symptoms: String,
        transcription_text: Option<String>,
        audio_file_path: Option<String>,
    ) -> Result<FfiMedicalRequest, KoereqError> {
        let new_request = NewMedicalRequest {
            patient_name,
            symptoms,
            transcription_text,
            audio_file_path,
        };
        let saved = self.store().save(&new_request.into_request()?)?;
        self.notify_saved(&saved.id)?;
        Ok(saved.into())
    }

    /// Get a request by ID.
    pub fn get_request(&self, id: String) -> Result<Option<FfiMedicalRequest>, KoereqError> {
        Ok(self.store().get(&id)?.map(|r| r.into()))
    }

    /// All requests, newest first.
    pub fn list_requests(&self) -> Result<Vec<FfiMedicalRequest>, KoereqError> {
        Ok(self.store().all()?.into_iter().map(|r| r.into()).collect())
    }

    /// Requests awaiting sync, oldest first.
    pub fn pending_requests(&self) -> Result<Vec<FfiMedicalRequest>, KoereqError> {
        Ok(self.store().pending()?.into_iter().map(|r| r.into()).collect())
    }

    pub fn pending_count(&self) -> Result<u32, KoereqError> {
        Ok(self.store().pending_count()?)
    }

    /// Attach a finished transcription. The request becomes pending again.
    pub fn attach_transcription(
        &self,
        id: String,
        text: String,
    ) -> Result<FfiMedicalRequest, KoereqError> {
        let updated = self
            .store()
            .attach_transcription(&id, &text)?
            .ok_or_else(|| KoereqError::NotFound(id.clone()))?;
        self.notify_saved(&id)?;
        Ok(updated.into())
    }

    pub fn delete_request(&self, id: String) -> Result<(), KoereqError> {
        Ok(self.store().delete(&id)?)
    }

    pub fn clear_requests(&self) -> Result<(), KoereqError> {
        Ok(self.store().clear()?)
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    /// Report OS connectivity. Going online starts a sync if the scheduler
    /// is running.
    pub fn set_connected(&self, connected: bool) {
        self.reachability.set_connected(connected);
    }

    pub fn is_connected(&self) -> bool {
        self.reachability.is_connected()
    }

    // =========================================================================
    // Sync Operations
    // =========================================================================

    /// Run a sync now. Blocks until the run finishes.
    pub fn sync_all(&self) -> Result<FfiSyncResult, KoereqError> {
        let outcome = self.runtime.block_on(self.engine.sync_all())?;
        Ok(outcome.into())
    }

    /// Submit one request now. Blocks until done.
    pub fn sync_one(&self, id: String) -> Result<FfiRecordOutcome, KoereqError> {
        let outcome = self.runtime.block_on(self.engine.sync_one(&id))?;
        Ok(outcome.into())
    }

    /// Summary of the last completed run.
    pub fn last_sync(&self) -> Result<Option<FfiLastSync>, KoereqError> {
        Ok(self.store().last_sync()?.map(|l| l.into()))
    }

    pub fn is_syncing(&self) -> bool {
        self.engine.state() == RunState::Running
    }

    // =========================================================================
    // Background Scheduler
    // =========================================================================

    /// Start background sync. Calling it again while running is a no-op.
    pub fn start_scheduler(&self) -> Result<(), KoereqError> {
        let mut slot = self.scheduler.lock()?;
        if slot.is_some() {
            return Ok(());
        }

        let (scheduler, handle) = Scheduler::new(Arc::clone(&self.engine), &self.config);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(2);

        if let Some(address) = &self.config.probe_address {
            let probe = Arc::new(ProbeReachability::new(
                address.clone(),
                self.config.probe_interval(),
                Arc::clone(&self.reachability),
            ));
            tasks.push(self.runtime.spawn(probe.run(shutdown_rx.clone())));
        }
        tasks.push(self.runtime.spawn(scheduler.run(shutdown_rx)));

        info!(probe = self.config.probe_address.is_some(), "Background sync started");
        *slot = Some(RunningScheduler {
            handle,
            shutdown,
            tasks,
        });
        Ok(())
    }

    /// Stop background sync, waiting for a run in progress to finish.
    pub fn stop_scheduler(&self) -> Result<(), KoereqError> {
        let Some(running) = self.scheduler.lock()?.take() else {
            return Ok(());
        };
        let _ = running.shutdown.send(true);
        for task in running.tasks {
            self.runtime
                .block_on(task)
                .map_err(|e| KoereqError::SyncError(format!("Background task failed: {}", e)))?;
        }
        Ok(())
    }

    /// Ask the running scheduler for a sync without waiting for it.
    /// Returns false when the scheduler is not running.
    pub fn request_sync(&self) -> Result<bool, KoereqError> {
        Ok(match self.scheduler.lock()?.as_ref() {
            Some(running) => running.handle.request_sync(),
            None => false,
        })
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe medical request.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedicalRequest {
    pub id: String,
    pub patient_name: String,
    pub symptoms: String,
    pub transcription_text: Option<String>,
    pub audio_file_path: Option<String>,
    /// RFC 3339
    pub created_at: String,
    /// RFC 3339
    pub last_modified_at: String,
    pub is_synced: bool,
    pub revision: i64,
}

impl From<MedicalRequest> for FfiMedicalRequest {
    fn from(request: MedicalRequest) -> Self {
        Self {
            is_synced: request.is_synced(),
            created_at: request.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            last_modified_at: request
                .last_modified_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            id: request.id,
            patient_name: request.patient_name,
            symptoms: request.symptoms,
            transcription_text: request.transcription_text,
            audio_file_path: request.audio_file_path,
            revision: request.revision,
        }
    }
}

/// FFI-safe sync run result.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct FfiSyncResult {
    pub success_count: u32,
    pub failure_count: u32,
    /// Another run was in progress; counts are zero.
    pub already_running: bool,
}

impl From<SyncOutcome> for FfiSyncResult {
    fn from(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Completed(result) => Self {
                success_count: result.success_count,
                failure_count: result.failure_count,
                already_running: false,
            },
            SyncOutcome::AlreadyRunning => Self {
                success_count: 0,
                failure_count: 0,
                already_running: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum FfiRecordOutcome {
    Synced,
    Failed { reason: String },
    AlreadySynced,
    NotFound,
}

impl From<RecordOutcome> for FfiRecordOutcome {
    fn from(outcome: RecordOutcome) -> Self {
        match outcome {
            RecordOutcome::Synced => FfiRecordOutcome::Synced,
            RecordOutcome::Failed(reason) => FfiRecordOutcome::Failed { reason },
            RecordOutcome::AlreadySynced => FfiRecordOutcome::AlreadySynced,
            RecordOutcome::NotFound => FfiRecordOutcome::NotFound,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLastSync {
    pub finished_at: String,
    pub success_count: u32,
    pub failure_count: u32,
}

impl From<LastSync> for FfiLastSync {
    fn from(last: LastSync) -> Self {
        Self {
            finished_at: last.finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            success_count: last.result.success_count,
            failure_count: last.result.failure_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct HostClient {
        calls: Arc<AtomicUsize>,
        reject: Option<String>,
    }

    impl FfiRemoteClient for HostClient {
        fn submit(&self, request: FfiMedicalRequest) -> Result<(), FfiSubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reject {
                Some(name) if *name == request.patient_name => {
                    Err(FfiSubmitError::Rejected("invalid".into()))
                }
                _ => Ok(()),
            }
        }
    }

    fn open(reject: Option<&str>) -> (Arc<KoereqCore>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = HostClient {
            calls: Arc::clone(&calls),
            reject: reject.map(String::from),
        };
        (open_request_store_in_memory(Box::new(client)).unwrap(), calls)
    }

    #[test]
    fn test_create_and_list() {
        let (core, _) = open(None);
        let created = core
            .create_request("Taro".into(), "fever".into(), None, None)
            .unwrap();
        assert!(!created.is_synced);

        let listed = core.list_requests().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(core.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_create_rejects_blank_fields() {
        let (core, _) = open(None);
        let err = core
            .create_request("  ".into(), "fever".into(), None, None)
            .unwrap_err();
        assert!(matches!(err, KoereqError::InvalidInput(_)));
    }

    #[test]
    fn test_sync_requires_connectivity() {
        let (core, calls) = open(None);
        core.create_request("Taro".into(), "fever".into(), None, None)
            .unwrap();

        assert!(!core.is_connected());
        assert!(matches!(
            core.sync_all().unwrap_err(),
            KoereqError::NetworkUnavailable
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sync_through_host_client() {
        let (core, calls) = open(Some("Hanako"));
        core.create_request("Taro".into(), "fever".into(), None, None)
            .unwrap();
        let rejected = core
            .create_request("Hanako".into(), "cough".into(), None, None)
            .unwrap();
        core.set_connected(true);

        let result = core.sync_all().unwrap();
        assert_eq!(
            result,
            FfiSyncResult {
                success_count: 1,
                failure_count: 1,
                already_running: false
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let pending = core.pending_requests().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, rejected.id);

        let last = core.last_sync().unwrap().unwrap();
        assert_eq!((last.success_count, last.failure_count), (1, 1));
    }

    #[test]
    fn test_attach_transcription_and_sync_one() {
        let (core, _) = open(None);
        let created = core
            .create_request("Taro".into(), "fever".into(), None, None)
            .unwrap();
        core.set_connected(true);
        assert_eq!(core.sync_one(created.id.clone()).unwrap(), FfiRecordOutcome::Synced);

        let updated = core
            .attach_transcription(created.id.clone(), "fever for two days".into())
            .unwrap();
        assert!(!updated.is_synced);
        assert_eq!(updated.transcription_text.as_deref(), Some("fever for two days"));

        assert!(matches!(
            core.attach_transcription("missing".into(), "x".into()),
            Err(KoereqError::NotFound(_))
        ));
    }

    #[test]
    fn test_scheduler_start_stop() {
        let (core, _) = open(None);
        assert!(!core.request_sync().unwrap());

        core.start_scheduler().unwrap();
        core.start_scheduler().unwrap();
        assert!(core.request_sync().unwrap());

        core.stop_scheduler().unwrap();
        core.stop_scheduler().unwrap();
        assert!(!core.request_sync().unwrap());
    }

    #[test]
    fn test_http_store_requires_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.db").to_string_lossy().to_string();
        assert!(matches!(
            open_request_store_http(path, "{}".into()),
            Err(KoereqError::InvalidInput(_))
        ));
    }
}
