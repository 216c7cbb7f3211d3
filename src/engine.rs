//! Contract with the external AMQP protocol engine.
//!
//! The bridge never speaks AMQP itself. An engine (a proactor binding, a
//! test double, ...) implements [`ProtocolEngine`] to expose the commands the
//! bridge issues and hands out [`EngineEvent`](crate::EngineEvent) batches
//! describing what happened on the wire.

use std::fmt;

use thiserror::Error;

use crate::event::EngineEvent;

/// Opaque identifier of a link owned by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "link#{}", self.0) }
}

/// Opaque identifier of an in-flight delivery owned by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryId(pub u64);

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery#{}", self.0)
    }
}

/// Terminal outcome recorded on a delivery before it is settled.
///
/// The bridge only ever accepts; an abort settles with no disposition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The message was received.
    Accepted,
}

/// Error condition attached to a closing endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    name: String,
    description: String,
}

impl Condition {
    /// Build a condition from its symbolic name and description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Symbolic condition name, such as `amqp:connection:forced`.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Human readable description.
    #[must_use]
    pub fn description(&self) -> &str { &self.description }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

/// Failures reported by [`ProtocolEngine::recv`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    /// The sender aborted the delivery; accumulated bytes must be dropped.
    #[error("delivery aborted by sender")]
    Aborted,
    /// No more bytes are available for this delivery.
    #[error("end of delivery stream")]
    EndOfStream,
    /// Any other engine error, identified by the engine's error code.
    #[error("engine read error {0}")]
    Transport(i32),
}

/// Transport settings applied when a connection is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    /// Whether the peer must authenticate.
    pub require_auth: bool,
    /// Space-separated SASL mechanisms offered to the peer.
    pub allowed_mechs: &'static str,
    /// Largest frame the transport accepts, in bytes.
    pub max_frame: usize,
}

/// Commands the bridge issues to the protocol engine.
///
/// Delivery and link queries take `&self`; anything that emits a frame or
/// changes endpoint state takes `&mut self`. A single engine serves one
/// connection with one session and one receiver link.
pub trait ProtocolEngine {
    /// Wait for the next batch of events.
    ///
    /// Returns `None` once the engine has shut down.
    fn next_batch(&mut self) -> Option<Vec<EngineEvent>>;

    /// Release the batch most recently returned by
    /// [`next_batch`](Self::next_batch).
    fn batch_done(&mut self) {}

    /// Whether the delivery has bytes to read.
    fn is_readable(&self, delivery: DeliveryId) -> bool;

    /// Whether more transfer frames are still expected for the delivery.
    fn is_partial(&self, delivery: DeliveryId) -> bool;

    /// Number of bytes currently buffered for the delivery.
    fn pending(&self, delivery: DeliveryId) -> usize;

    /// Read up to `buf.len()` pending bytes, returning how many were copied.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Aborted`] when the sender aborted the delivery,
    /// [`RecvError::EndOfStream`] when nothing is left, or
    /// [`RecvError::Transport`] for any other failure.
    fn recv(&mut self, delivery: DeliveryId, buf: &mut [u8]) -> Result<usize, RecvError>;

    /// Optionally record a disposition and then settle the delivery.
    fn settle(&mut self, delivery: DeliveryId, disposition: Option<Disposition>);

    /// Credit the sender currently holds on the link.
    fn link_credit(&self, link: LinkId) -> u32;

    /// Grant `credit` additional deliveries to the sender.
    fn flow(&mut self, link: LinkId, credit: u32);

    /// Close a link, optionally with an error condition.
    fn close_link(&mut self, link: LinkId, condition: Option<Condition>);

    /// Set the container id and open the connection.
    fn open_connection(&mut self, container_id: &str);

    /// Close the connection.
    fn close_connection(&mut self);

    /// Apply transport settings to a freshly bound connection.
    fn configure_transport(&mut self, settings: TransportSettings);

    /// Open (or complete opening) the session.
    fn open_session(&mut self);

    /// Size the session windows.
    fn configure_session(&mut self, incoming_capacity: usize, outgoing_window: usize);

    /// Close the session.
    fn close_session(&mut self);

    /// Create and open a receiver link attached to `source`.
    fn open_receiver(&mut self, name: &str, source: &str) -> LinkId;
}
