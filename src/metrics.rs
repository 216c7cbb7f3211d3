//! Metric helpers for `rxbridge`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Counter of messages committed to the staging buffer.
pub const MESSAGES_COMMITTED: &str = "rxbridge_messages_committed_total";
/// Counter of commits dropped on a full non-blocking buffer.
pub const BUFFER_OVERRUNS: &str = "rxbridge_buffer_overruns_total";
/// Counter of deliveries drained and discarded for exceeding a slot.
pub const DELIVERIES_OVERSIZE: &str = "rxbridge_deliveries_oversize_total";
/// Counter of deliveries aborted by the sender.
pub const DELIVERIES_ABORTED: &str = "rxbridge_deliveries_aborted_total";
/// Counter of unexpected delivery read errors.
pub const READ_ERRORS: &str = "rxbridge_read_errors_total";
/// Counter of link credit granted to the sender.
pub const CREDIT_GRANTED: &str = "rxbridge_credit_granted_total";
/// Gauge of staging slots free for new commits.
pub const FREE_SLOTS: &str = "rxbridge_free_slots";

/// Record a committed message.
pub fn inc_committed() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_COMMITTED).increment(1);
}

/// Record a dropped commit.
pub fn inc_overruns() {
    #[cfg(feature = "metrics")]
    counter!(BUFFER_OVERRUNS).increment(1);
}

/// Record an oversize delivery.
pub fn inc_oversize() {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_OVERSIZE).increment(1);
}

/// Record an aborted delivery.
pub fn inc_aborted() {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_ABORTED).increment(1);
}

/// Record a read error.
pub fn inc_read_errors() {
    #[cfg(feature = "metrics")]
    counter!(READ_ERRORS).increment(1);
}

/// Record credit granted to the sender.
pub fn add_credit(credit: u32) {
    #[cfg(feature = "metrics")]
    counter!(CREDIT_GRANTED).increment(u64::from(credit));
    #[cfg(not(feature = "metrics"))]
    let _ = credit;
}

/// Publish the number of free staging slots.
#[cfg_attr(
    feature = "metrics",
    expect(
        clippy::cast_precision_loss,
        reason = "slot counts are far below f64 precision limits"
    )
)]
pub fn set_free_slots(free: usize) {
    #[cfg(feature = "metrics")]
    gauge!(FREE_SLOTS).set(free as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = free;
}
