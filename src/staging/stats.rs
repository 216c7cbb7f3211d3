//! Counter snapshots and the cross-thread probe.

use serde::{Deserialize, Serialize};

#[cfg(loom)]
use loom::sync::Arc;
#[cfg(not(loom))]
use std::sync::Arc;

use super::Shared;

/// Point-in-time view of the staging buffer counters and occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingStats {
    /// Commits dropped because the buffer was full in non-blocking mode.
    pub overruns: u64,
    /// Slots handed to the consumer.
    pub processed: u64,
    /// Times the consumer waited for data.
    pub blocked_cycles: u64,
    /// Committed messages not yet handed to the consumer.
    pub queued: usize,
    /// Commits that would currently succeed without blocking.
    pub free: usize,
}

/// Read-only observer of a staging buffer.
///
/// Probes are cheap to clone and may be held by any thread, for example a
/// statistics reporter running alongside the producer and consumer.
#[derive(Clone)]
pub struct BufferProbe {
    shared: Arc<Shared>,
}

impl BufferProbe {
    pub(super) fn new(shared: Arc<Shared>) -> Self { Self { shared } }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> StagingStats { self.shared.stats() }

    /// See [`Producer::free_capacity`](super::Producer::free_capacity).
    #[must_use]
    pub fn free_capacity(&self) -> usize { self.shared.lock_cursors().free() }

    /// Total number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize { self.shared.slots.len() }
}

impl std::fmt::Debug for BufferProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferProbe")
            .field("stats", &self.stats())
            .finish()
    }
}
