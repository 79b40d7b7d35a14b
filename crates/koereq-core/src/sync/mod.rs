//! Moving local requests to the remote service.
//!
//! - [`remote`]: the submission seam and its HTTP implementation
//! - [`reachability`]: connectivity signal
//! - [`engine`]: pending → synced, one run at a time
//! - [`scheduler`]: when runs happen

pub mod engine;
pub mod reachability;
pub mod remote;
pub mod scheduler;

pub use engine::{RunState, SyncEngine, SyncError};
pub use reachability::{ManualReachability, ProbeReachability, ReachabilityMonitor};
pub use remote::{HttpRemoteClient, RemoteClient, SubmitError};
pub use scheduler::{Scheduler, SchedulerHandle, SyncTrigger};
