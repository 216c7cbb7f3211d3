//! Error and outcome types for staging buffer operations.

use thiserror::Error;

/// Result of a [`Producer::commit`](super::Producer::commit).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write slot was published to the consumer immediately.
    Committed,
    /// The buffer was full; the producer waited for a free slot and then
    /// published the write slot.
    BlockedThenCommitted,
    /// The buffer was full and blocking was disabled; the write slot was
    /// cleared and the overrun counter incremented.
    Dropped,
}

impl CommitOutcome {
    /// Whether the message reached the consumer side.
    #[must_use]
    pub const fn is_committed(self) -> bool { !matches!(self, Self::Dropped) }
}

/// Errors raised by the staging buffer halves.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StagingError {
    /// The opposite half of the buffer has been dropped. For the consumer
    /// this is only reported once every committed message was drained.
    #[error("staging buffer closed")]
    Closed,
}
