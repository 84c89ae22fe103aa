//! # Pass Scheduling
//!
//! Coalesces reconcile triggers so that at most one pass runs at a time and
//! at most one follow-up pass is queued behind it.
//!
//! Triggers are watch events and resync ticks. A trigger while idle starts a
//! pass; any number of triggers during a pass collapse into a single rerun
//! once it finishes.

/// Busy/pending flags for the reconcile loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncState {
    busy: bool,
    pending: bool,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger
    ///
    /// Returns `true` when the caller should start a pass now. While a pass
    /// is running the trigger is remembered instead.
    pub fn trigger(&mut self) -> bool {
        if self.busy {
            self.pending = true;
            false
        } else {
            self.busy = true;
            true
        }
    }

    /// Mark the running pass finished
    ///
    /// Returns `true` when triggers arrived during the pass, in which case the
    /// state stays busy and the caller should run again immediately.
    pub fn finish(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.busy = false;
            false
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}
