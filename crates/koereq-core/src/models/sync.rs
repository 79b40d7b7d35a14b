//! Sync run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counts produced by one sync run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub success_count: u32,
    pub failure_count: u32,
}

impl SyncResult {
    pub fn new(success_count: u32, failure_count: u32) -> Self {
        Self {
            success_count,
            failure_count,
        }
    }

    /// Number of records attempted in the run.
    pub fn attempted(&self) -> u32 {
        self.success_count + self.failure_count
    }

    /// True when at least one record succeeded and at least one failed.
    pub fn is_partial(&self) -> bool {
        self.success_count > 0 && self.failure_count > 0
    }
}

/// What a `sync_all` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The run executed and every snapshot record was attempted.
    Completed(SyncResult),
    /// Another run held the gate; this call coalesced into it.
    AlreadyRunning,
}

impl SyncOutcome {
    /// The run's counts, if this call performed the run.
    pub fn result(&self) -> Option<SyncResult> {
        match self {
            SyncOutcome::Completed(result) => Some(*result),
            SyncOutcome::AlreadyRunning => None,
        }
    }
}

/// Result of submitting a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Acknowledged and marked synced
    Synced,
    /// Submission failed; the record stays pending
    Failed(String),
    /// Nothing to do, the record was already synced
    AlreadySynced,
    /// No record with that id
    NotFound,
}

/// Bookkeeping of the last completed run, persisted for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastSync {
    pub finished_at: DateTime<Utc>,
    pub result: SyncResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_result() {
        assert!(SyncResult::new(1, 1).is_partial());
        assert!(!SyncResult::new(2, 0).is_partial());
        assert_eq!(SyncResult::new(2, 3).attempted(), 5);
    }

    #[test]
    fn test_outcome_result() {
        let done = SyncOutcome::Completed(SyncResult::new(1, 0));
        assert_eq!(done.result(), Some(SyncResult::new(1, 0)));
        assert_eq!(SyncOutcome::AlreadyRunning.result(), None);
    }
}
