//! # netcom-probe
//!
//! A diagnostic probe that subscribes to a remote listener over TCP or UDP,
//! pings it once per interval, and unsubscribes on exit, plus a small
//! listener that accepts those subscriptions.
//!
//! ## Architecture
//!
//! ```text
//! netcom-probe                       netcom-listen
//!     │                                   │
//!     ├── Probe (client/)                 ├── Listener (listener/)
//!     │     └── ProbeConnection ──────────┤     ├── tcp / udp serve loops
//!     │                                   │     ├── ListenerContext
//!     │                                   │     └── EventReporter
//!     │                                   │
//!     ├── Encoding / FrameDecoder / Reply (protocol/)
//!     └── Command, Transport, EventBus, SubscriberRegistry (domain/)
//! ```
//!
//! The probe writes one message per tick and never reads from its socket.
//! The listener answers each Ping with its client list, for peers that do.

pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod listener;
pub mod protocol;
