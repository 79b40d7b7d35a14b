//! Network reachability monitoring.
//!
//! Reachability is advisory: a `true` reading can be stale by the time a
//! submission starts, so callers still treat every submission as fallible.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Source of the "is the remote service reachable" signal.
pub trait ReachabilityMonitor: Send + Sync {
    /// Current reading.
    fn is_connected(&self) -> bool;

    /// Receiver that observes every transition.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Reachability pushed in from outside, e.g. OS connectivity callbacks.
pub struct ManualReachability {
    state: watch::Sender<bool>,
}

impl ManualReachability {
    pub fn new(connected: bool) -> Self {
        let (state, _) = watch::channel(connected);
        Self { state }
    }

    /// Update the reading. Returns true if this was a transition.
    ///
    /// Repeating the current value notifies nobody.
    pub fn set_connected(&self, connected: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            info!(connected, "Reachability changed");
        }
        changed
    }
}

impl ReachabilityMonitor for ManualReachability {
    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Probes a TCP endpoint on an interval and publishes the result.
///
/// Readings land in a [`ManualReachability`], so OS callbacks and probes
/// can feed the same signal.
pub struct ProbeReachability {
    address: String,
    interval: Duration,
    connect_timeout: Duration,
    state: Arc<ManualReachability>,
}

impl ProbeReachability {
    pub fn new(
        address: impl Into<String>,
        interval: Duration,
        state: Arc<ManualReachability>,
    ) -> Self {
        Self {
            address: address.into(),
            interval,
            connect_timeout: interval.min(Duration::from_secs(5)),
            state,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Probe once and publish the reading.
    pub async fn probe_once(&self) -> bool {
        let connect = TcpStream::connect(self.address.as_str());
        let connected = matches!(
            tokio::time::timeout(self.connect_timeout, connect).await,
            Ok(Ok(_))
        );
        debug!(address = %self.address, connected, "Reachability probe");
        self.state.set_connected(connected);
        connected
    }

    /// Probe until `shutdown` changes or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!(address = %self.address, "Reachability probe stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
            }
        }
    }
}

impl ReachabilityMonitor for ProbeReachability {
    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
