//! Probe error types with process exit code mapping.
//!
//! [`ProbeError`] is the central error type for both binaries. Each variant
//! belongs to one of three kinds: configuration errors (nothing was opened),
//! transport errors (a socket call failed) and framing errors (the listener
//! received bytes it could not decode).

use std::io;
use std::num::ParseIntError;

/// Error enum shared by the probe client and the listener.
///
/// # Exit codes
///
/// | Kind          | Variants                                              | Exit |
/// |---------------|-------------------------------------------------------|------|
/// | Configuration | `UnknownProtocol`, `InvalidPort`, `InvalidListenUrl`, `UnknownEncoding` | 1 |
/// | Setup         | `Resolve`, `Connect`, `Bind`                          | 1    |
/// | Runtime       | `Send`, `Frame`, `Reply`, `Io`                        | 0    |
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Transport name is neither `tcp` nor `udp`.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Port argument is not a base-10 integer in `0..=65535`.
    #[error("invalid port {value:?}: {source}")]
    InvalidPort {
        /// Raw argument as given on the command line.
        value: String,
        /// Underlying integer parse failure.
        #[source]
        source: ParseIntError,
    },

    /// Listener URL is not of the form `<protocol>://<address>:<port>`.
    #[error("invalid listen url {0:?}: expected <protocol>://<address>:<port>")]
    InvalidListenUrl(String),

    /// Wire encoding name is neither `byte` nor `framed`.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Host name resolution failed or produced no addresses.
    #[error("cannot resolve {host}:{port}: {source}")]
    Resolve {
        /// Host as given.
        host: String,
        /// Port as given.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },

    /// Outbound connect failed.
    #[error("{0}")]
    Connect(#[source] io::Error),

    /// Listener could not bind its socket.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Sending a command on an open connection failed.
    #[error("{0}")]
    Send(#[source] io::Error),

    /// Received bytes could not be decoded into a command frame.
    #[error("frame error: {0}")]
    Frame(String),

    /// A client-list reply could not be encoded or decoded.
    #[error("reply error: {0}")]
    Reply(#[from] serde_json::Error),

    /// Any other I/O failure (status output, log file).
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ProbeError {
    /// Returns the process exit status for this error.
    ///
    /// Configuration and setup failures exit non-zero. Failures that happen
    /// once the probe is running end the run normally, since cleanup has
    /// already taken place.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownProtocol(_)
            | Self::InvalidPort { .. }
            | Self::InvalidListenUrl(_)
            | Self::UnknownEncoding(_)
            | Self::Resolve { .. }
            | Self::Connect(_)
            | Self::Bind { .. } => 1,
            Self::Send(_) | Self::Frame(_) | Self::Reply(_) | Self::Io(_) => 0,
        }
    }

    /// Returns `true` for errors raised while validating arguments, before
    /// any socket exists.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownProtocol(_)
                | Self::InvalidPort { .. }
                | Self::InvalidListenUrl(_)
                | Self::UnknownEncoding(_)
        )
    }
}
