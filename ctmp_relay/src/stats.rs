// Relay counters.
//
// Updated with relaxed atomics from both the main loop and the source reader
// thread; read through `snapshot()`. They exist for logging and for tests
// that need to wait on the relay reaching a state, not for exact accounting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters shared by the relay's threads.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub(crate) frames_relayed: AtomicU64,
    pub(crate) frames_rejected: AtomicU64,
    pub(crate) sources_accepted: AtomicU64,
    pub(crate) sources_rejected: AtomicU64,
    pub(crate) sources_released: AtomicU64,
    pub(crate) listeners_accepted: AtomicU64,
    pub(crate) listeners_pruned: AtomicU64,
    pub(crate) listeners: AtomicUsize,
}

/// Point-in-time copy of `RelayStats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames written out to the listener set.
    pub frames_relayed: u64,
    /// Invalid frames stopped at the broadcast gate.
    pub frames_rejected: u64,
    pub sources_accepted: u64,
    /// Source connections refused because one was already running.
    pub sources_rejected: u64,
    /// Stopped sources cleared from the slot.
    pub sources_released: u64,
    pub listeners_accepted: u64,
    /// Listeners removed after a failed probe or write.
    pub listeners_pruned: u64,
    /// Listeners currently registered.
    pub listeners: usize,
}

impl RelayStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            sources_accepted: self.sources_accepted.load(Ordering::Relaxed),
            sources_rejected: self.sources_rejected.load(Ordering::Relaxed),
            sources_released: self.sources_released.load(Ordering::Relaxed),
            listeners_accepted: self.listeners_accepted.load(Ordering::Relaxed),
            listeners_pruned: self.listeners_pruned.load(Ordering::Relaxed),
            listeners: self.listeners.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
