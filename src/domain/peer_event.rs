//! Listener events describing probe traffic.
//!
//! Every peer connect, decoded command, disconnect and rejection observed by
//! the listener emits a [`PeerEvent`] through the [`super::EventBus`].
//! Events are printed by the listener binary and consumed by tests.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Command, Transport};

/// Domain event emitted by the listener.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PeerEvent {
    /// A TCP peer connected, or a UDP peer sent its first datagram.
    PeerConnected {
        /// Remote address of the peer.
        peer: SocketAddr,
        /// Transport the peer arrived on.
        transport: Transport,
        /// Time of the connect.
        timestamp: DateTime<Utc>,
    },

    /// A complete command frame was decoded.
    CommandReceived {
        /// Remote address of the peer.
        peer: SocketAddr,
        /// Transport the frame arrived on.
        transport: Transport,
        /// Decoded command.
        command: Command,
        /// Backward port advertised by framed messages (0 when absent).
        backward_port: u16,
        /// Time the frame completed.
        timestamp: DateTime<Utc>,
    },

    /// A TCP peer closed its stream, or a UDP peer unsubscribed.
    PeerDisconnected {
        /// Remote address of the peer.
        peer: SocketAddr,
        /// Transport the peer used.
        transport: Transport,
        /// Time of the disconnect.
        timestamp: DateTime<Utc>,
    },

    /// Traffic from a peer outside the listener's address filter.
    PeerDiscarded {
        /// Remote address of the rejected peer.
        peer: SocketAddr,
        /// The only IP address the listener accepts.
        expected: std::net::IpAddr,
        /// Time of the rejection.
        timestamp: DateTime<Utc>,
    },

    /// Bytes from a peer that did not decode into a command.
    FrameRejected {
        /// Remote address of the peer.
        peer: SocketAddr,
        /// Decoder error text.
        reason: String,
        /// Time of the rejection.
        timestamp: DateTime<Utc>,
    },
}

impl PeerEvent {
    /// Returns the peer address associated with this event.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        match self {
            Self::PeerConnected { peer, .. }
            | Self::CommandReceived { peer, .. }
            | Self::PeerDisconnected { peer, .. }
            | Self::PeerDiscarded { peer, .. }
            | Self::FrameRejected { peer, .. } => *peer,
        }
    }

    /// Returns the decoded command, if this is a [`PeerEvent::CommandReceived`].
    #[must_use]
    pub const fn command(&self) -> Option<Command> {
        match self {
            Self::CommandReceived { command, .. } => Some(*command),
            _ => None,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::PeerConnected { .. } => "peer_connected",
            Self::CommandReceived { .. } => "command_received",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::PeerDiscarded { .. } => "peer_discarded",
            Self::FrameRejected { .. } => "frame_rejected",
        }
    }

    const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PeerConnected { timestamp, .. }
            | Self::CommandReceived { timestamp, .. }
            | Self::PeerDisconnected { timestamp, .. }
            | Self::PeerDiscarded { timestamp, .. }
            | Self::FrameRejected { timestamp, .. } => *timestamp,
        }
    }
}

/// One human-readable line per event, prefixed with `hh:mm:ss.mmm`.
impl fmt::Display for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - ", self.timestamp().format("%H:%M:%S%.3f"))?;
        match self {
            Self::PeerConnected {
                peer, transport, ..
            } => write!(f, "Added {transport} connection from {peer}"),
            Self::CommandReceived {
                peer,
                command,
                backward_port,
                ..
            } => {
                write!(f, "Incoming {command} from {peer}")?;
                if *backward_port > 0 {
                    write!(f, " (backward port {backward_port})")?;
                }
                Ok(())
            }
            Self::PeerDisconnected {
                peer, transport, ..
            } => write!(f, "Removed {transport} connection from {peer}"),
            Self::PeerDiscarded { peer, expected, .. } => {
                write!(f, "Discard connection from {peer}. Expected only {expected}.")
            }
            Self::FrameRejected { peer, reason, .. } => {
                write!(f, "Rejected bytes from {peer}: {reason}")
            }
        }
    }
}
