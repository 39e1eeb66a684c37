//! Probe command codes.
//!
//! [`Command`] is the whole vocabulary of the probe: three fixed one-octet
//! codes with no payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// A command sent by the probe to the remote listener.
///
/// The discriminant is the value written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Command {
    /// Register interest with the remote listener. Always the first message.
    Subscribe = 1,
    /// Withdraw interest. Always the last message, sent during cleanup.
    Unsubscribe = 2,
    /// Keep-alive sent on every tick after the first.
    Ping = 3,
}

impl Command {
    /// Returns the wire code of this command.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns the command to send on the given zero-based tick.
    #[must_use]
    pub const fn for_tick(tick: u64) -> Self {
        if tick == 0 { Self::Subscribe } else { Self::Ping }
    }
}

impl TryFrom<u8> for Command {
    type Error = ProbeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Subscribe),
            2 => Ok(Self::Unsubscribe),
            3 => Ok(Self::Ping),
            other => Err(ProbeError::Frame(format!("unknown command code {other}"))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
        };
        f.write_str(name)
    }
}
