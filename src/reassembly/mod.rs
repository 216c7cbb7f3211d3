//! Delivery reassembly on top of the staging buffer.
//!
//! A delivery arrives as any number of readable events. Each event's pending
//! bytes are appended to the producer's current write slot until the engine
//! reports the delivery complete, at which point the slot is committed, the
//! delivery settled and link credit recomputed.
//!
//! A delivery that would not fit in one slot switches to an oversize state:
//! its bytes are still pulled from the engine, so the sender's session window
//! keeps moving, but they are overwritten chunk by chunk and the message is
//! discarded once complete.

pub mod credit;
mod error;

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

pub use error::{DeliveryError, DeliveryOutcome, DeliveryReport};

use crate::{
    engine::{Condition, DeliveryId, Disposition, LinkId, ProtocolEngine, RecvError},
    metrics,
    staging::{BufferProbe, Producer, SlotMut},
};

/// Counters kept by a [`Reassembler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassemblyStats {
    /// Messages committed to the staging buffer.
    pub received: u64,
    /// Readable events that left the delivery incomplete.
    pub partial: u64,
    /// Deliveries aborted by the sender.
    pub aborted: u64,
    /// Deliveries discarded for exceeding the slot capacity.
    pub oversize: u64,
    /// Unexpected engine read errors.
    pub read_errors: u64,
    /// Total credit granted to the sender.
    pub credit_granted: u64,
}

/// Turns engine deliveries into committed staging buffer messages.
#[derive(Debug)]
pub struct Reassembler {
    producer: Producer,
    /// Bytes seen so far for a delivery being drained and discarded.
    oversize: Option<usize>,
    message_limit: Option<NonZeroU64>,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// Create a reassembler writing into `producer`.
    #[must_use]
    pub fn new(producer: Producer) -> Self {
        Self {
            producer,
            oversize: None,
            message_limit: None,
            stats: ReassemblyStats::default(),
        }
    }

    /// Report [`DeliveryReport::limit_reached`] once `limit` messages have
    /// been committed.
    #[must_use]
    pub fn with_message_limit(mut self, limit: Option<NonZeroU64>) -> Self {
        self.message_limit = limit;
        self
    }

    /// Handle one readable event for `delivery` on `link`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Read`] after closing the link when the engine
    /// reports an unexpected read failure, and [`DeliveryError::Staging`]
    /// when the consumer half of the buffer has gone away.
    pub fn on_delivery<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        delivery: DeliveryId,
    ) -> Result<DeliveryReport, DeliveryError> {
        if !engine.is_readable(delivery) {
            trace!(%delivery, "delivery not readable");
            return Ok(DeliveryReport::new(DeliveryOutcome::NotReadable));
        }

        match self.read_pending(engine, delivery) {
            Ok(()) | Err(RecvError::EndOfStream) => {}
            Err(RecvError::Aborted) => return Ok(self.abort(engine, link, delivery)),
            Err(RecvError::Transport(code)) => {
                return Err(self.fail(engine, link, delivery, code));
            }
        }

        if engine.is_partial(delivery) {
            self.stats.partial += 1;
            let buffered = self.producer.current_write_slot().len();
            trace!(%delivery, buffered, "delivery incomplete");
            return Ok(DeliveryReport::new(DeliveryOutcome::Partial { buffered }));
        }

        self.complete(engine, link, delivery)
    }

    /// Grant the credit a freshly opened receiver link starts with.
    pub fn grant_initial_credit<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
    ) -> u32 {
        let credit = credit::initial_credit(&self.producer);
        if credit > 0 {
            engine.flow(link, credit);
            metrics::add_credit(credit);
            self.stats.credit_granted += u64::from(credit);
        }
        debug!(%link, credit, "initial credit granted");
        credit
    }

    /// Counters accumulated so far.
    #[must_use]
    pub fn stats(&self) -> ReassemblyStats { self.stats }

    /// Whether the configured message limit has been reached.
    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.message_limit
            .is_some_and(|limit| self.stats.received >= limit.get())
    }

    /// Observe the underlying staging buffer.
    #[must_use]
    pub fn probe(&self) -> BufferProbe { self.producer.probe() }

    /// Give back the producer half.
    #[must_use]
    pub fn into_producer(self) -> Producer { self.producer }

    /// Pull every pending byte of `delivery` into the write slot, or drain it
    /// when it does not fit.
    fn read_pending<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        delivery: DeliveryId,
    ) -> Result<(), RecvError> {
        let pending = engine.pending(delivery);
        let mut slot = self.producer.current_write_slot();

        if self.oversize.is_none() && slot.len() + pending >= slot.capacity() {
            debug!(
                %delivery,
                buffered = slot.len(),
                pending,
                capacity = slot.capacity(),
                "delivery exceeds slot capacity; draining"
            );
            self.oversize = Some(slot.len());
            slot.clear();
        }

        match self.oversize.as_mut() {
            Some(attempted) => {
                *attempted += drain_into_scratch(&mut slot, engine, delivery, pending)?;
            }
            None => {
                append_to_slot(&mut slot, engine, delivery, pending)?;
            }
        }
        Ok(())
    }

    fn abort<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        delivery: DeliveryId,
    ) -> DeliveryReport {
        self.producer.current_write_slot().clear();
        self.oversize = None;
        engine.settle(delivery, None);
        engine.flow(link, 1);
        self.stats.aborted += 1;
        self.stats.credit_granted += 1;
        metrics::inc_aborted();
        metrics::add_credit(1);
        debug!(%delivery, "delivery aborted by sender");
        DeliveryReport {
            outcome: DeliveryOutcome::Aborted,
            credit_granted: 1,
            limit_reached: self.limit_reached(),
        }
    }

    fn fail<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        delivery: DeliveryId,
        code: i32,
    ) -> DeliveryError {
        self.producer.current_write_slot().clear();
        self.oversize = None;
        self.stats.read_errors += 1;
        metrics::inc_read_errors();
        error!(%delivery, %link, code, "delivery read failed; closing link");
        engine.close_link(
            link,
            Some(Condition::new("broker", format!("delivery error: {code}"))),
        );
        DeliveryError::Read { delivery, code }
    }

    fn complete<E: ProtocolEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        delivery: DeliveryId,
    ) -> Result<DeliveryReport, DeliveryError> {
        let outcome = if let Some(attempted) = self.oversize.take() {
            let mut slot = self.producer.current_write_slot();
            slot.clear();
            self.stats.oversize += 1;
            metrics::inc_oversize();
            warn!(
                %delivery,
                attempted,
                capacity = slot.capacity(),
                "oversize delivery discarded"
            );
            DeliveryOutcome::Discarded { attempted }
        } else {
            let len = self.producer.current_write_slot().len();
            let commit = self.producer.commit()?;
            if commit.is_committed() {
                self.stats.received += 1;
            }
            trace!(%delivery, len, ?commit, "delivery complete");
            DeliveryOutcome::Completed { len, commit }
        };

        engine.settle(delivery, Some(Disposition::Accepted));
        let credit_granted = credit::replenish(&self.producer, engine, link)?;
        self.stats.credit_granted += u64::from(credit_granted);

        let limit_reached = self.limit_reached();
        if limit_reached {
            debug!(received = self.stats.received, "message limit reached");
        }
        Ok(DeliveryReport {
            outcome,
            credit_granted,
            limit_reached,
        })
    }
}

/// Append up to `pending` bytes after the slot's current length.
///
/// The caller guarantees the bytes fit.
fn append_to_slot<E: ProtocolEngine + ?Sized>(
    slot: &mut SlotMut<'_>,
    engine: &mut E,
    delivery: DeliveryId,
    pending: usize,
) -> Result<usize, RecvError> {
    let mut read = 0;
    loop {
        let spare = slot.spare_mut();
        let want = (pending - read).min(spare.len());
        let received = engine.recv(delivery, &mut spare[..want]);
        match received {
            Ok(0) | Err(RecvError::EndOfStream) => return Ok(read),
            Ok(n) => {
                slot.advance(n);
                read += n;
                if read >= pending {
                    return Ok(read);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Read and overwrite `pending` bytes from the start of the slot in chunks
/// of at most the slot capacity.
fn drain_into_scratch<E: ProtocolEngine + ?Sized>(
    slot: &mut SlotMut<'_>,
    engine: &mut E,
    delivery: DeliveryId,
    pending: usize,
) -> Result<usize, RecvError> {
    let mut drained = 0;
    loop {
        let scratch = slot.scratch_mut();
        let want = (pending - drained).min(scratch.len());
        let received = engine.recv(delivery, &mut scratch[..want]);
        match received {
            Ok(0) | Err(RecvError::EndOfStream) => return Ok(drained),
            Ok(n) => {
                drained += n;
                if drained >= pending {
                    return Ok(drained);
                }
            }
            Err(err) => return Err(err),
        }
    }
}
