//! Probe and listener configuration.
//!
//! Positional arguments come from the command line (`clap`). Tunables may
//! also come from environment variables (or a `.env` file via `dotenvy`);
//! a command-line flag wins over the environment, and a missing or
//! unparsable variable falls back to its default.
//!
//! | Variable                    | Default | Used by  |
//! |-----------------------------|---------|----------|
//! | `PROBE_INTERVAL_MS`         | `1000`  | probe    |
//! | `PROBE_ENCODING`            | `byte`  | both     |
//! | `PROBE_BACKWARD_PORT`       | `0`     | probe    |
//! | `LISTEN_EVENT_BUS_CAPACITY` | `1024`  | listener |
//! | `LISTEN_LOG_FILE`           | unset   | listener |
//! | `LISTEN_PEER_TIMEOUT_MS`    | `30000` | listener |

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::domain::Transport;
use crate::error::ProbeError;
use crate::protocol::Encoding;

/// Default time between two consecutive commands.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default silence after which the UDP listener drops a peer.
pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 30_000;

const PROBE_ENV_HELP: &str = "Environment:
  PROBE_INTERVAL_MS    milliseconds between commands (default 1000)
  PROBE_ENCODING       byte or framed (default byte)
  PROBE_BACKWARD_PORT  port advertised in framed messages (default 0)";

const LISTEN_ENV_HELP: &str = "Environment:
  PROBE_ENCODING             byte or framed (default byte)
  LISTEN_LOG_FILE            append event lines to this file
  LISTEN_EVENT_BUS_CAPACITY  event bus size (default 1024)
  LISTEN_PEER_TIMEOUT_MS     drop silent UDP peers after this long, 0 keeps them (default 30000)";

/// Command-line arguments of `netcom-probe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "netcom-probe",
    version,
    about = "Subscribe to a remote listener and ping it once per interval",
    after_help = PROBE_ENV_HELP
)]
pub struct ProbeArgs {
    /// Transport to use: `tcp` or `udp` (any case).
    pub transport: String,

    /// Remote host name or address.
    pub address: String,

    /// Remote port.
    pub port: String,

    /// Milliseconds between commands.
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Wire encoding: `byte` or `framed`.
    #[arg(long)]
    pub encoding: Option<String>,

    /// Port advertised to the listener in framed messages.
    #[arg(long)]
    pub backward_port: Option<u16>,
}

/// Validated probe configuration.
///
/// Built once at startup via [`ProbeConfig::from_args`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Selected transport.
    pub transport: Transport,
    /// Remote host, resolved only when connecting.
    pub address: String,
    /// Remote port.
    pub port: u16,
    /// Time between commands. Never zero.
    pub interval: Duration,
    /// Wire encoding for every command.
    pub encoding: Encoding,
    /// Port advertised in framed messages.
    pub backward_port: u16,
}

impl ProbeConfig {
    /// Validates parsed arguments and fills the tunables from the
    /// environment.
    ///
    /// The transport is checked before the port, so an unknown protocol is
    /// reported even when the port is malformed too.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::UnknownProtocol`] for a transport other than
    /// `tcp`/`udp`, [`ProbeError::InvalidPort`] for a non-numeric port and
    /// [`ProbeError::UnknownEncoding`] for a bad `--encoding`.
    pub fn from_args(args: ProbeArgs) -> Result<Self, ProbeError> {
        let transport: Transport = args.transport.parse()?;
        let port = parse_port(&args.port)?;

        let interval_ms = args
            .interval_ms
            .unwrap_or_else(|| parse_env("PROBE_INTERVAL_MS", DEFAULT_INTERVAL_MS));
        let encoding = resolve_encoding(args.encoding)?;
        let backward_port = args
            .backward_port
            .unwrap_or_else(|| parse_env("PROBE_BACKWARD_PORT", 0));

        Ok(Self {
            transport,
            address: args.address,
            port,
            interval: Duration::from_millis(interval_ms.max(1)),
            encoding,
            backward_port,
        })
    }
}

/// Command-line arguments of `netcom-listen`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "netcom-listen",
    version,
    about = "Accept probe subscriptions and log every command received",
    after_help = LISTEN_ENV_HELP
)]
pub struct ListenArgs {
    /// Listener options: `<protocol>://<address>:<port>`. Use `@` as the
    /// address to listen on all interfaces.
    pub url: String,

    /// Wire encoding: `byte` or `framed`.
    #[arg(long)]
    pub encoding: Option<String>,

    /// Print events as JSON lines instead of plain text.
    #[arg(long)]
    pub json: bool,

    /// Append event lines to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Drop a UDP peer after this many silent milliseconds; 0 keeps peers
    /// until they unsubscribe.
    #[arg(long)]
    pub peer_timeout_ms: Option<u64>,
}

/// Validated listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// Transport to listen on.
    pub transport: Transport,
    /// Local address to bind.
    pub bind_addr: SocketAddr,
    /// When set, traffic from any other peer IP is discarded.
    pub accept_only: Option<IpAddr>,
    /// Expected wire encoding.
    pub encoding: Encoding,
    /// Capacity of the event bus.
    pub event_bus_capacity: usize,
    /// Print events as JSON lines.
    pub json: bool,
    /// Optional event log file.
    pub log_file: Option<PathBuf>,
    /// Silence after which a UDP peer is dropped; `None` keeps it.
    pub peer_timeout: Option<Duration>,
}

impl ListenConfig {
    /// Validates parsed arguments and fills the tunables from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidListenUrl`] for a malformed URL,
    /// [`ProbeError::UnknownProtocol`] for an unknown scheme,
    /// [`ProbeError::InvalidPort`] for a non-numeric port and
    /// [`ProbeError::UnknownEncoding`] for a bad `--encoding`.
    pub fn from_args(args: ListenArgs) -> Result<Self, ProbeError> {
        let ListenUrl {
            transport,
            address,
            port,
        } = ListenUrl::parse(&args.url)?;

        let bind_ip = if address.is_loopback() {
            address
        } else if address.is_ipv6() {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let accept_only = (!address.is_loopback() && !address.is_unspecified()).then_some(address);

        let log_file = args
            .log_file
            .or_else(|| std::env::var("LISTEN_LOG_FILE").ok().map(PathBuf::from));
        let peer_timeout_ms = args
            .peer_timeout_ms
            .unwrap_or_else(|| parse_env("LISTEN_PEER_TIMEOUT_MS", DEFAULT_PEER_TIMEOUT_MS));

        Ok(Self {
            transport,
            bind_addr: SocketAddr::new(bind_ip, port),
            accept_only,
            encoding: resolve_encoding(args.encoding)?,
            event_bus_capacity: parse_env("LISTEN_EVENT_BUS_CAPACITY", 1024),
            json: args.json,
            log_file,
            peer_timeout: (peer_timeout_ms > 0).then(|| Duration::from_millis(peer_timeout_ms)),
        })
    }
}

/// Parsed `<protocol>://<address>:<port>` listener URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenUrl {
    /// URL scheme.
    pub transport: Transport,
    /// Host part; `@` maps to the IPv4 wildcard and `localhost` to loopback.
    pub address: IpAddr,
    /// Port part.
    pub port: u16,
}

impl ListenUrl {
    /// Parses a listener URL.
    ///
    /// # Errors
    ///
    /// See [`ListenConfig::from_args`].
    pub fn parse(raw: &str) -> Result<Self, ProbeError> {
        let invalid = || ProbeError::InvalidListenUrl(raw.to_string());

        let (scheme, rest) = raw.split_once("://").ok_or_else(invalid)?;
        let transport: Transport = scheme.parse()?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let port = parse_port(port)?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let address = match host.to_ascii_lowercase().as_str() {
            "@" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            other => other.parse().map_err(|_| invalid())?,
        };

        Ok(Self {
            transport,
            address,
            port,
        })
    }
}

fn parse_port(raw: &str) -> Result<u16, ProbeError> {
    raw.parse().map_err(|source| ProbeError::InvalidPort {
        value: raw.to_string(),
        source,
    })
}

/// Uses the flag if given, else `PROBE_ENCODING`, else the default.
/// An explicit flag must be valid; an invalid environment value is ignored.
fn resolve_encoding(flag: Option<String>) -> Result<Encoding, ProbeError> {
    match flag {
        Some(raw) => raw.parse(),
        None => Ok(parse_env("PROBE_ENCODING", Encoding::default())),
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
