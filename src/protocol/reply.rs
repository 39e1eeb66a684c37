//! Client-list replies.
//!
//! The listener answers every Ping with the peers it currently holds, as a
//! single JSON line:
//!
//! ```text
//! {"type":"info_response","clients":[{"address":"127.0.0.1","port":50000,"subscribed_at":"2024-01-01T00:00:00Z"}]}
//! ```

use std::net::IpAddr;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Subscriber;
use crate::error::ProbeError;

/// One peer as listed in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Peer IP address.
    pub address: IpAddr,
    /// Peer source port.
    pub port: u16,
    /// When the peer was registered.
    pub subscribed_at: DateTime<Utc>,
}

impl From<&Subscriber> for ClientInfo {
    fn from(subscriber: &Subscriber) -> Self {
        Self {
            address: subscriber.peer.ip(),
            port: subscriber.peer.port(),
            subscribed_at: subscriber.subscribed_at,
        }
    }
}

/// Message the listener writes back to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    /// Every registered peer, oldest first.
    InfoResponse {
        /// Listed peers.
        clients: Vec<ClientInfo>,
    },
}

impl Reply {
    /// Builds the client list from registry entries.
    #[must_use]
    pub fn client_list(subscribers: &[Subscriber]) -> Self {
        Self::InfoResponse {
            clients: subscribers.iter().map(ClientInfo::from).collect(),
        }
    }

    /// Serializes the reply as one newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Reply`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes, ProbeError> {
        let json = serde_json::to_vec(self)?;
        let mut buf = BytesMut::with_capacity(json.len().saturating_add(1));
        buf.put_slice(&json);
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    /// Parses one reply line, with or without its trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Reply`] if the line is not a valid reply.
    pub fn decode(line: &[u8]) -> Result<Self, ProbeError> {
        Ok(serde_json::from_slice(line.trim_ascii_end())?)
    }

    /// Listed peers.
    #[must_use]
    pub fn clients(&self) -> &[ClientInfo] {
        match self {
            Self::InfoResponse { clients } => clients,
        }
    }
}
