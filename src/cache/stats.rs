//! Store Statistics Module
//!
//! Tracks disk traffic, notification delivery and registry sizes.

use serde::Serialize;

// == Store Stats ==
/// Snapshot of store counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Keys currently held in memory
    pub cached_entries: usize,
    /// Keys whose presence or absence is resolved in memory
    pub warm_keys: usize,
    /// Registered watchers
    pub active_watchers: usize,
    /// Value files read from disk (cold reads)
    pub disk_reads: u64,
    /// Value files written
    pub disk_writes: u64,
    /// Value files removed (including already missing ones)
    pub disk_removes: u64,
    /// Notifications enqueued to watchers
    pub notifications_sent: u64,
    /// Notifications folded into an already pending one
    pub notifications_conflated: u64,
}

impl StoreStats {
    // == Constructor ==
    /// Creates a new StoreStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_disk_read(&mut self) {
        self.disk_reads += 1;
    }

    pub fn record_disk_write(&mut self) {
        self.disk_writes += 1;
    }

    pub fn record_disk_remove(&mut self) {
        self.disk_removes += 1;
    }

    pub fn record_notification(&mut self) {
        self.notifications_sent += 1;
    }

    pub fn record_conflation(&mut self) {
        self.notifications_conflated += 1;
    }

    // == Update Sizes ==
    /// Fills in the registry sizes for a snapshot.
    pub fn set_sizes(&mut self, cached_entries: usize, warm_keys: usize, active_watchers: usize) {
        self.cached_entries = cached_entries;
        self.warm_keys = warm_keys;
        self.active_watchers = active_watchers;
    }
}
