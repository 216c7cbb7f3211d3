//! Error and outcome types for delivery reassembly.

use thiserror::Error;

use crate::{
    engine::DeliveryId,
    staging::{CommitOutcome, StagingError},
};

/// What happened to a delivery on one readable event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The delivery had no readable bytes; nothing was done.
    NotReadable,
    /// Bytes were accumulated and more are expected.
    Partial {
        /// Bytes held in the write slot so far.
        buffered: usize,
    },
    /// The sender aborted the delivery; accumulated bytes were forgotten and
    /// one credit returned.
    Aborted,
    /// The delivery did not fit in a slot; it was drained and dropped.
    Discarded {
        /// Total size of the delivery.
        attempted: usize,
    },
    /// The delivery completed and was handed to the staging buffer.
    Completed {
        /// Message length in bytes.
        len: usize,
        /// How the staging buffer took it.
        commit: CommitOutcome,
    },
}

/// Summary of one [`Reassembler::on_delivery`](super::Reassembler::on_delivery)
/// call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    /// What happened to the delivery.
    pub outcome: DeliveryOutcome,
    /// Credit granted to the sender as a consequence.
    pub credit_granted: u32,
    /// Whether the configured message limit has been reached.
    pub limit_reached: bool,
}

impl DeliveryReport {
    pub(super) const fn new(outcome: DeliveryOutcome) -> Self {
        Self {
            outcome,
            credit_granted: 0,
            limit_reached: false,
        }
    }
}

/// Errors raised while reassembling a delivery.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The engine reported an unexpected read error; the link was closed.
    #[error("reading {delivery} failed with engine error {code}")]
    Read {
        /// Delivery being read.
        delivery: DeliveryId,
        /// Engine error code.
        code: i32,
    },
    /// The staging buffer is closed.
    #[error(transparent)]
    Staging(#[from] StagingError),
}
