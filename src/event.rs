//! Events emitted by the protocol engine.

use crate::engine::{Condition, DeliveryId, LinkId};

/// One engine notification.
///
/// Close events carry the remote (or transport) error condition, if any. A
/// set condition is fatal to the receive session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A delivery on `link` changed state; it may be readable.
    Delivery {
        /// Link the delivery arrived on.
        link: LinkId,
        /// The delivery itself.
        delivery: DeliveryId,
    },
    /// A connection object was created and needs opening.
    ConnectionInit,
    /// The connection was bound to a transport.
    ConnectionBound,
    /// The local end of the connection opened.
    ConnectionLocalOpen,
    /// The peer opened the connection.
    ConnectionRemoteOpen,
    /// The peer closed the connection.
    ConnectionRemoteClose {
        /// Error reported by the peer.
        condition: Option<Condition>,
    },
    /// A session object was created.
    SessionInit,
    /// The local end of the session opened.
    SessionLocalOpen,
    /// The peer opened the session.
    SessionRemoteOpen,
    /// The peer closed the session.
    SessionRemoteClose {
        /// Error reported by the peer.
        condition: Option<Condition>,
    },
    /// The peer closed a link.
    LinkRemoteClose {
        /// Closed link.
        link: LinkId,
        /// Error reported by the peer.
        condition: Option<Condition>,
    },
    /// The peer detached a link.
    LinkRemoteDetach {
        /// Detached link.
        link: LinkId,
        /// Error reported by the peer.
        condition: Option<Condition>,
    },
    /// The transport closed.
    TransportClosed {
        /// Transport-level error.
        condition: Option<Condition>,
    },
    /// An engine timer fired.
    Timeout,
    /// The engine has nothing left to do.
    Inactive,
}

impl EngineEvent {
    /// Stable name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Delivery { .. } => "delivery",
            Self::ConnectionInit => "connection_init",
            Self::ConnectionBound => "connection_bound",
            Self::ConnectionLocalOpen => "connection_local_open",
            Self::ConnectionRemoteOpen => "connection_remote_open",
            Self::ConnectionRemoteClose { .. } => "connection_remote_close",
            Self::SessionInit => "session_init",
            Self::SessionLocalOpen => "session_local_open",
            Self::SessionRemoteOpen => "session_remote_open",
            Self::SessionRemoteClose { .. } => "session_remote_close",
            Self::LinkRemoteClose { .. } => "link_remote_close",
            Self::LinkRemoteDetach { .. } => "link_remote_detach",
            Self::TransportClosed { .. } => "transport_closed",
            Self::Timeout => "timeout",
            Self::Inactive => "inactive",
        }
    }
}
