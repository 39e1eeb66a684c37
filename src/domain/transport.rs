//! Transport selector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// Network protocol used for the probe connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Connection-oriented byte stream.
    Tcp,
    /// Connectionless datagrams with a fixed default destination.
    Udp,
}

impl Transport {
    /// Lowercase protocol name, as accepted on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl FromStr for Transport {
    type Err = ProbeError;

    /// Parses `tcp` or `udp`, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(ProbeError::UnknownProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_any_case() {
        for (raw, expected) in [
            ("tcp", Transport::Tcp),
            ("TCP", Transport::Tcp),
            ("Tcp", Transport::Tcp),
            ("udp", Transport::Udp),
            ("UDP", Transport::Udp),
        ] {
            let Ok(parsed) = raw.parse::<Transport>() else {
                panic!("{raw} should parse");
            };
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn rejects_other_protocols() {
        let Err(err) = "sctp".parse::<Transport>() else {
            panic!("sctp must be rejected");
        };
        assert!(err.to_string().contains("Unknown protocol"));
        assert!("".parse::<Transport>().is_err());
        assert!("tcp ".parse::<Transport>().is_err());
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(Transport::Udp.to_string(), "udp");
        assert_eq!(Transport::Tcp.as_str().parse::<Transport>().ok(), Some(Transport::Tcp));
    }
}
