//! Translation of staging buffer occupancy into link credit.
//!
//! Every completed delivery re-derives how many more deliveries the sender may
//! transmit. In blocking mode a full buffer withholds credit by suspending
//! the producer until the consumer frees a slot; in non-blocking mode one
//! extra unit is always kept outstanding so the sender is never starved, and
//! the overrun counter absorbs the excess.

use tracing::debug;

use crate::{
    engine::{LinkId, ProtocolEngine},
    metrics,
    staging::{Producer, StagingError},
};

/// Credit to grant given `free` slots and `outstanding` link credit.
///
/// # Examples
///
/// ```
/// use rxbridge::reassembly::credit::credit_to_grant;
///
/// assert_eq!(credit_to_grant(3, 1, true), 2);
/// assert_eq!(credit_to_grant(3, 1, false), 3);
/// assert_eq!(credit_to_grant(0, 4, false), 0);
/// ```
#[must_use]
pub fn credit_to_grant(free: usize, outstanding: u32, block_producer: bool) -> u32 {
    let free = if block_producer {
        free
    } else {
        free.saturating_add(1)
    };
    u32::try_from(free)
        .unwrap_or(u32::MAX)
        .saturating_sub(outstanding)
}

/// Credit granted when the receiver link first opens.
#[must_use]
pub fn initial_credit(producer: &Producer) -> u32 {
    credit_to_grant(producer.free_capacity(), 0, producer.blocks_when_full())
}

/// Free slots to advertise, waiting for one when blocking on a full buffer.
fn available_slots(producer: &Producer) -> Result<usize, StagingError> {
    let free = producer.free_capacity();
    if free == 0 && producer.blocks_when_full() {
        debug!("staging buffer full; withholding credit until a slot frees");
        return producer.wait_for_space();
    }
    Ok(free)
}

/// Recompute and grant credit after a delivery completed.
///
/// Returns the number of credit units granted, which may be zero.
///
/// # Errors
///
/// Returns [`StagingError::Closed`] when blocking for space and the consumer
/// has gone away.
pub(crate) fn replenish<E: ProtocolEngine + ?Sized>(
    producer: &Producer,
    engine: &mut E,
    link: LinkId,
) -> Result<u32, StagingError> {
    let outstanding = engine.link_credit(link);
    let free = available_slots(producer)?;
    metrics::set_free_slots(free);
    let grant = credit_to_grant(free, outstanding, producer.blocks_when_full());
    if grant > 0 {
        engine.flow(link, grant);
        metrics::add_credit(grant);
    }
    debug!(%link, outstanding, free, grant, "credit recomputed");
    Ok(grant)
}
