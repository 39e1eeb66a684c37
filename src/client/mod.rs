//! Probe client: one connection, one timer, three commands.

pub mod connection;
pub mod probe;

pub use connection::ProbeConnection;
pub use probe::{Probe, ProbeExit, ProbeReport};
