//! Bounded staging buffer between the protocol producer and the consumer
//! thread.
//!
//! The buffer is a ring of `N` pre-allocated [`Slot`]s addressed by two
//! cursors:
//!
//! - `head` is the slot the producer is currently writing into;
//! - `tail` is the slot most recently handed to the consumer. It acts as a
//!   sentinel, so `head == tail` never occurs and "empty" and "full" stay
//!   distinguishable.
//!
//! Committed messages are the slots strictly between `tail` and `head`. The
//! cursors and counters sit behind a single mutex paired with two condition
//! variables: `has_data` wakes a consumer waiting in
//! [`Consumer::acquire_next`], `has_space` wakes a producer waiting in a
//! blocking [`Producer::commit`]. Slot bytes live in per-slot locks that are
//! never contended: cursor discipline gives each slot exactly one owner at a
//! time, and a slot lock is only ever taken after the cursor lock has been
//! released or while no one else can own that slot.
//!
//! ```
//! use rxbridge::{CommitOutcome, StagingBuffer};
//!
//! let (mut producer, mut consumer) = StagingBuffer::new(4, 64, false)
//!     .expect("valid geometry")
//!     .split();
//!
//! let mut slot = producer.current_write_slot();
//! slot.spare_mut()[..5].copy_from_slice(b"hello");
//! slot.advance(5);
//! drop(slot);
//! assert_eq!(producer.commit(), Ok(CommitOutcome::Committed));
//!
//! let message = consumer.acquire_next().expect("message available");
//! assert_eq!(&*message, b"hello");
//! ```

mod error;
mod slot;
mod stats;

#[cfg(not(loom))]
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::{fmt, sync::PoisonError};

#[cfg(loom)]
use loom::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

pub use error::{CommitOutcome, StagingError};
pub(crate) use slot::Slot;
pub use slot::{SlotMut, SlotRef};
pub use stats::{BufferProbe, StagingStats};

use crate::{
    config::{BridgeConfig, ConfigError, SlotGeometry},
    metrics,
};

/// Overruns are logged on the first drop and then once per this many drops.
const OVERRUN_LOG_EVERY: u64 = 64;

/// Cursor state guarded by the buffer mutex.
#[derive(Debug)]
struct Cursors {
    head: usize,
    tail: usize,
    count: usize,
    overruns: u64,
    processed: u64,
    blocked_cycles: u64,
    producer_closed: bool,
    consumer_closed: bool,
}

impl Cursors {
    fn new(count: usize) -> Self {
        Self {
            head: 0,
            tail: count - 1,
            count,
            overruns: 0,
            processed: 0,
            blocked_cycles: 0,
            producer_closed: false,
            consumer_closed: false,
        }
    }

    fn next(&self, index: usize) -> usize { (index + 1) % self.count }

    fn is_full(&self) -> bool { self.next(self.head) == self.tail }

    fn is_empty(&self) -> bool { self.next(self.tail) == self.head }

    /// Distance from `tail` forward to `head`, in `1..count`.
    fn span(&self) -> usize {
        debug_assert_ne!(self.head, self.tail, "head and tail must never coincide");
        (self.head + self.count - self.tail) % self.count
    }

    /// Commits that succeed without blocking: `N - 1 - ((head - tail) mod N)`.
    fn free(&self) -> usize { self.count - 1 - self.span() }

    /// Committed messages awaiting the consumer.
    fn queued(&self) -> usize { self.span() - 1 }
}

pub(crate) struct Shared {
    slots: Box<[Mutex<Slot>]>,
    slot_capacity: usize,
    block_producer: bool,
    cursors: Mutex<Cursors>,
    has_data: Condvar,
    has_space: Condvar,
}

impl Shared {
    fn lock_cursors(&self) -> MutexGuard<'_, Cursors> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(&self, index: usize) -> MutexGuard<'_, Slot> {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> StagingStats {
        let cursors = self.lock_cursors();
        StagingStats {
            overruns: cursors.overruns,
            processed: cursors.processed,
            blocked_cycles: cursors.blocked_cycles,
            queued: cursors.queued(),
            free: cursors.free(),
        }
    }
}

/// A bounded ring of reusable slots, not yet split into its two halves.
pub struct StagingBuffer {
    shared: Arc<Shared>,
}

impl StagingBuffer {
    /// Allocate `slot_count` slots of `slot_capacity` bytes each.
    ///
    /// With `block_producer` set, a commit on a full buffer waits for the
    /// consumer; otherwise it is dropped and counted as an overrun.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `slot_count` is below
    /// [`MIN_SLOT_COUNT`](crate::config::MIN_SLOT_COUNT), `slot_capacity` is
    /// zero, or the total size overflows.
    pub fn new(
        slot_count: usize,
        slot_capacity: usize,
        block_producer: bool,
    ) -> Result<Self, ConfigError> {
        let geometry = SlotGeometry::new(slot_count, slot_capacity)?;
        let capacity = geometry.capacity.get();
        let slots = (0..geometry.count)
            .map(|_| Mutex::new(Slot::with_capacity(capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        debug!(
            slot_count = geometry.count,
            slot_capacity = capacity,
            block_producer,
            "staging buffer allocated"
        );
        if geometry.count <= 2 {
            warn!(
                slot_count = geometry.count,
                "staging buffer cannot queue any message; every commit will block or drop"
            );
        }
        Ok(Self {
            shared: Arc::new(Shared {
                slots,
                slot_capacity: capacity,
                block_producer,
                cursors: Mutex::new(Cursors::new(geometry.count)),
                has_data: Condvar::new(),
                has_space: Condvar::new(),
            }),
        })
    }

    /// Allocate a buffer sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Self::new(
            config.slot_count(),
            config.slot_capacity(),
            config.block_producer(),
        )
    }

    /// Observe the buffer without owning either half.
    #[must_use]
    pub fn probe(&self) -> BufferProbe { BufferProbe::new(Arc::clone(&self.shared)) }

    /// Split into the producer and consumer halves.
    #[must_use]
    pub fn split(self) -> (Producer, Consumer) {
        (
            Producer {
                shared: Arc::clone(&self.shared),
            },
            Consumer {
                shared: self.shared,
            },
        )
    }
}

impl fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("slot_count", &self.shared.slots.len())
            .field("slot_capacity", &self.shared.slot_capacity)
            .field("block_producer", &self.shared.block_producer)
            .finish()
    }
}

/// Producer half: accumulates into the write slot and commits it.
///
/// Dropping the producer closes the buffer; the consumer drains what was
/// already committed and then observes [`StagingError::Closed`].
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    /// Borrow the slot at `head` for in-place accumulation.
    pub fn current_write_slot(&mut self) -> SlotMut<'_> {
        let head = self.shared.lock_cursors().head;
        SlotMut::new(self.shared.lock_slot(head))
    }

    /// Publish the write slot using the configured blocking policy.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Closed`] when the consumer has been dropped.
    pub fn commit(&mut self) -> Result<CommitOutcome, StagingError> {
        self.commit_with(self.shared.block_producer)
    }

    /// Publish the write slot, overriding the configured blocking policy.
    ///
    /// - Not full: `head` advances and a waiting consumer is woken.
    /// - Full with `block_if_full`: waits on `has_space` until the consumer
    ///   frees a slot, then advances.
    /// - Full without `block_if_full`: the write slot is cleared, the
    ///   overrun counter increments and the buffer is otherwise unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Closed`] when the consumer has been dropped.
    pub fn commit_with(&mut self, block_if_full: bool) -> Result<CommitOutcome, StagingError> {
        let mut cursors = self.shared.lock_cursors();
        let mut blocked = false;
        loop {
            if cursors.consumer_closed {
                return Err(StagingError::Closed);
            }
            if !cursors.is_full() {
                break;
            }
            if !block_if_full {
                cursors.overruns += 1;
                let overruns = cursors.overruns;
                let head = cursors.head;
                drop(cursors);
                self.shared.lock_slot(head).clear();
                if overruns == 1 || overruns.is_multiple_of(OVERRUN_LOG_EVERY) {
                    warn!(overruns, "staging buffer full; message dropped");
                }
                metrics::inc_overruns();
                return Ok(CommitOutcome::Dropped);
            }
            if !blocked {
                debug!("staging buffer full; producer waiting for space");
            }
            blocked = true;
            cursors = self
                .shared
                .has_space
                .wait(cursors)
                .unwrap_or_else(PoisonError::into_inner);
        }
        cursors.head = cursors.next(cursors.head);
        trace!(head = cursors.head, tail = cursors.tail, "slot committed");
        drop(cursors);
        self.shared.has_data.notify_one();
        metrics::inc_committed();
        Ok(if blocked {
            CommitOutcome::BlockedThenCommitted
        } else {
            CommitOutcome::Committed
        })
    }

    /// Commits that would currently succeed without blocking.
    ///
    /// Computed as `N - 1 - ((head - tail) mod N)`, which is exact in both
    /// wraparound directions.
    #[must_use]
    pub fn free_capacity(&self) -> usize { self.shared.lock_cursors().free() }

    /// Block until at least one commit can succeed, returning the free count.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Closed`] when the consumer has been dropped.
    pub fn wait_for_space(&self) -> Result<usize, StagingError> {
        let mut cursors = self.shared.lock_cursors();
        loop {
            let free = cursors.free();
            if free > 0 {
                return Ok(free);
            }
            if cursors.consumer_closed {
                return Err(StagingError::Closed);
            }
            cursors = self
                .shared
                .has_space
                .wait(cursors)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Committed messages awaiting the consumer.
    #[must_use]
    pub fn in_use(&self) -> usize { self.shared.lock_cursors().queued() }

    /// Total number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize { self.shared.slots.len() }

    /// Capacity of each slot in bytes.
    #[must_use]
    pub fn slot_capacity(&self) -> usize { self.shared.slot_capacity }

    /// Whether [`commit`](Self::commit) waits on a full buffer.
    #[must_use]
    pub fn blocks_when_full(&self) -> bool { self.shared.block_producer }

    /// Snapshot the buffer counters.
    #[must_use]
    pub fn stats(&self) -> StagingStats { self.shared.stats() }

    /// Observe the buffer from another thread.
    #[must_use]
    pub fn probe(&self) -> BufferProbe { BufferProbe::new(Arc::clone(&self.shared)) }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.shared.lock_cursors().producer_closed = true;
        self.shared.has_data.notify_all();
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Consumer half: takes committed messages in FIFO order.
///
/// Dropping the consumer closes the buffer; subsequent commits fail with
/// [`StagingError::Closed`] and a producer blocked on a full buffer wakes.
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    /// Wait for the next committed message and return a view of it.
    ///
    /// Retires the previously returned slot, waking a producer waiting for
    /// space. Each wait for data increments the blocked-cycle counter. The
    /// call may block indefinitely while the producer is alive.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Closed`] once the producer has been dropped and
    /// every committed message has been returned.
    pub fn acquire_next(&mut self) -> Result<SlotRef<'_>, StagingError> {
        let mut cursors = self.shared.lock_cursors();
        while cursors.is_empty() {
            if cursors.producer_closed {
                return Err(StagingError::Closed);
            }
            cursors = self
                .shared
                .has_data
                .wait(cursors)
                .unwrap_or_else(PoisonError::into_inner);
            cursors.blocked_cycles += 1;
        }
        let current = Self::retire(&self.shared, cursors);
        Ok(SlotRef::new(self.shared.lock_slot(current)))
    }

    /// Return the next committed message if one is ready, without waiting.
    pub fn try_acquire_next(&mut self) -> Option<SlotRef<'_>> {
        let cursors = self.shared.lock_cursors();
        if cursors.is_empty() {
            return None;
        }
        let current = Self::retire(&self.shared, cursors);
        Some(SlotRef::new(self.shared.lock_slot(current)))
    }

    /// Clear the slot at `tail`, advance `tail` and wake the producer.
    ///
    /// The retired slot is cleared while the cursor lock is held so that the
    /// producer cannot reuse it before its length is reset.
    fn retire(shared: &Shared, mut cursors: MutexGuard<'_, Cursors>) -> usize {
        shared.lock_slot(cursors.tail).clear();
        cursors.tail = cursors.next(cursors.tail);
        cursors.processed += 1;
        let current = cursors.tail;
        drop(cursors);
        shared.has_space.notify_one();
        current
    }

    /// Snapshot the buffer counters.
    #[must_use]
    pub fn stats(&self) -> StagingStats { self.shared.stats() }

    /// Observe the buffer from another thread.
    #[must_use]
    pub fn probe(&self) -> BufferProbe { BufferProbe::new(Arc::clone(&self.shared)) }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.shared.lock_cursors().consumer_closed = true;
        self.shared.has_space.notify_all();
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
