//! Reusable fixed-capacity byte slots and the borrowed views handed out by
//! the staging buffer halves.

use std::{fmt, ops::Deref};

#[cfg(loom)]
use loom::sync::MutexGuard;
#[cfg(not(loom))]
use std::sync::MutexGuard;

/// One pre-allocated cell of the staging buffer.
#[derive(Debug)]
pub(crate) struct Slot {
    data: Box<[u8]>,
    len: usize,
}

impl Slot {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0_u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize { self.len }

    pub(crate) fn clear(&mut self) { self.len = 0; }

    fn capacity(&self) -> usize { self.data.len() }

    fn filled(&self) -> &[u8] { &self.data[..self.len] }
}

/// Mutable view of the producer's current write slot.
///
/// The view borrows the [`Producer`](super::Producer) mutably, so the slot
/// cannot be committed while bytes are still being written into it.
pub struct SlotMut<'a> {
    guard: MutexGuard<'a, Slot>,
}

impl<'a> SlotMut<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, Slot>) -> Self { Self { guard } }

    /// Bytes accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize { self.guard.len() }

    /// Whether nothing has been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.guard.len() == 0 }

    /// Fixed capacity of the slot.
    #[must_use]
    pub fn capacity(&self) -> usize { self.guard.capacity() }

    /// Bytes that can still be appended.
    #[must_use]
    pub fn remaining(&self) -> usize { self.guard.capacity() - self.guard.len }

    /// Accumulated bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { self.guard.filled() }

    /// Unfilled tail of the slot, starting at the current length.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let len = self.guard.len;
        &mut self.guard.data[len..]
    }

    /// The whole slot from its start, ignoring the current length.
    ///
    /// Used to drain bytes that will be discarded.
    pub fn scratch_mut(&mut self) -> &mut [u8] { &mut self.guard.data }

    /// Mark `n` bytes of [`spare_mut`](Self::spare_mut) as filled.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`remaining`](Self::remaining).
    pub fn advance(&mut self, n: usize) {
        assert!(
            n <= self.remaining(),
            "cannot advance slot by {n} bytes; only {} remaining",
            self.remaining()
        );
        self.guard.len += n;
    }

    /// Set the accumulated length directly, for bytes written through
    /// [`scratch_mut`](Self::scratch_mut).
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`capacity`](Self::capacity).
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= self.capacity(),
            "slot length {len} exceeds capacity {}",
            self.capacity()
        );
        self.guard.len = len;
    }

    /// Forget the accumulated bytes.
    pub fn clear(&mut self) { self.guard.clear(); }
}

/// Read view of the message most recently handed to the consumer.
///
/// The slot stays reserved for the consumer until the next call to
/// [`Consumer::acquire_next`](super::Consumer::acquire_next).
pub struct SlotRef<'a> {
    guard: MutexGuard<'a, Slot>,
}

impl<'a> SlotRef<'a> {
    pub(crate) fn new(guard: MutexGuard<'a, Slot>) -> Self { Self { guard } }

    /// Message bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { self.guard.filled() }

    /// Copy the message out of the slot.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> { self.as_slice().to_vec() }
}

impl Deref for SlotRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target { self.as_slice() }
}

impl AsRef<[u8]> for SlotRef<'_> {
    fn as_ref(&self) -> &[u8] { self.as_slice() }
}

impl fmt::Debug for SlotMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotMut")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl fmt::Debug for SlotRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRef").field("len", &self.len()).finish()
    }
}
