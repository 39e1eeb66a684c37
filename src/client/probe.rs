//! The subscribe / ping / unsubscribe run loop.
//!
//! [`Probe::run`] connects, sends Subscribe on the first tick and Ping on
//! every later tick of a [`tokio::time::interval`], and stops on the
//! shutdown future or on the first send error, the very first included.
//! Cleanup (Unsubscribe, then close) runs on both exit paths.

use std::future::Future;
use std::io::Write;
use std::net::SocketAddr;

use tokio::time::MissedTickBehavior;

use super::connection::ProbeConnection;
use crate::config::ProbeConfig;
use crate::domain::Command;
use crate::error::ProbeError;

/// Why the probe loop ended.
#[derive(Debug)]
pub enum ProbeExit {
    /// The shutdown future completed.
    Cancelled,
    /// A send failed; the error text was printed.
    SendFailed(ProbeError),
}

/// Summary of one probe run.
#[derive(Debug)]
pub struct ProbeReport {
    /// Remote address, or `None` if cancelled before connecting.
    pub peer: Option<SocketAddr>,
    /// Commands sent successfully by the loop (Subscribe and Pings).
    pub commands_sent: u64,
    /// Whether the final Unsubscribe got out.
    pub unsubscribed: bool,
    /// Loop exit reason.
    pub exit: ProbeExit,
}

/// A configured probe writing its status lines to `W`.
///
/// `W` is standard output in the binary and a buffer in tests.
#[derive(Debug)]
pub struct Probe<W> {
    config: ProbeConfig,
    status: W,
}

impl<W: Write> Probe<W> {
    /// Creates a probe for `config`.
    #[must_use]
    pub const fn new(config: ProbeConfig, status: W) -> Self {
        Self { config, status }
    }

    /// Runs the probe until `shutdown` completes or a send fails.
    ///
    /// Status lines: `Connected to <addr> <port>` after connecting,
    /// `Cancel...` on shutdown, the raw error text on a send failure and
    /// `Disconnected` once the connection is released.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Resolve`] or [`ProbeError::Connect`] if the
    /// connection cannot be opened, and [`ProbeError::Io`] if a status
    /// line cannot be written. Send failures are not errors; they end
    /// the run with [`ProbeExit::SendFailed`].
    pub async fn run<F>(mut self, shutdown: F) -> Result<ProbeReport, ProbeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let ProbeConfig {
            transport,
            address,
            port,
            encoding,
            backward_port,
            ..
        } = self.config.clone();
        let farewell = encoding.encode(Command::Unsubscribe, backward_port);

        let conn = tokio::select! {
            biased;
            () = &mut shutdown => {
                self.line("Cancel...")?;
                return Ok(ProbeReport {
                    peer: None,
                    commands_sent: 0,
                    unsubscribed: false,
                    exit: ProbeExit::Cancelled,
                });
            }
            conn = ProbeConnection::connect(transport, &address, port, farewell) => conn?,
        };
        self.run_on(conn, shutdown).await
    }

    /// Runs the command loop on an already open connection, then releases
    /// it. Prints the same status lines as [`run`](Self::run) from
    /// `Connected to` onwards.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Io`] if a status line cannot be written.
    pub async fn run_on<F>(
        mut self,
        mut conn: ProbeConnection,
        shutdown: F,
    ) -> Result<ProbeReport, ProbeError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let ProbeConfig {
            transport,
            address,
            port,
            interval,
            encoding,
            backward_port,
        } = self.config.clone();
        let peer = conn.peer_addr();
        self.line(&format!("Connected to {address} {port}"))?;
        tracing::info!(%transport, %peer, %encoding, ?interval, "probe connected");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_sent: u64 = 0;

        let exit = loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    self.line("Cancel...")?;
                    break ProbeExit::Cancelled;
                }
                _ = ticker.tick() => {
                    let command = Command::for_tick(commands_sent);
                    if let Err(err) = conn.send(&encoding.encode(command, backward_port)).await {
                        tracing::warn!(%command, error = %err, "send failed");
                        self.line(&err.to_string())?;
                        break ProbeExit::SendFailed(err);
                    }
                    commands_sent = commands_sent.saturating_add(1);
                    tracing::debug!(%command, commands_sent, "command sent");
                }
            }
        };

        let unsubscribed = match conn.release().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "unsubscribe failed");
                false
            }
        };
        self.line("Disconnected")?;
        tracing::info!(%peer, commands_sent, unsubscribed, "probe disconnected");

        Ok(ProbeReport {
            peer: Some(peer),
            commands_sent,
            unsubscribed,
            exit,
        })
    }

    fn line(&mut self, text: &str) -> Result<(), ProbeError> {
        writeln!(self.status, "{text}")?;
        self.status.flush()?;
        Ok(())
    }
}
