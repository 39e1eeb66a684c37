//! Prints listener events and appends them to an optional log file.

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::domain::PeerEvent;
use crate::error::ProbeError;

/// Renders [`PeerEvent`]s as text or JSON lines.
#[derive(Debug)]
pub struct EventReporter {
    json: bool,
    log_file: Option<File>,
}

impl EventReporter {
    /// Creates a reporter, opening `log_file` in append mode if given.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Io`] if the log file cannot be opened.
    pub async fn open(json: bool, log_file: Option<&Path>) -> Result<Self, ProbeError> {
        let log_file = match log_file {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
            None => None,
        };
        Ok(Self { json, log_file })
    }

    /// Renders one event without a trailing newline.
    #[must_use]
    pub fn render(&self, event: &PeerEvent) -> String {
        if self.json {
            serde_json::to_string(event).unwrap_or_default()
        } else {
            event.to_string()
        }
    }

    /// Writes every event from `events` to `out` until the bus closes.
    ///
    /// A failing log file is reported once and then ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Io`] if writing to `out` fails.
    pub async fn run<W>(
        mut self,
        mut events: broadcast::Receiver<PeerEvent>,
        mut out: W,
    ) -> Result<(), ProbeError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "reporter lagged behind event bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let mut line = self.render(&event);
            line.push('\n');
            out.write_all(line.as_bytes()).await?;
            out.flush().await?;

            if let Some(file) = self.log_file.as_mut()
                && let Err(err) = file.write_all(line.as_bytes()).await
            {
                tracing::warn!(error = %err, "log file write failed; disabling log file");
                self.log_file = None;
            }
        }

        if let Some(mut file) = self.log_file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::SocketAddr;

    use chrono::Utc;

    use super::*;
    use crate::domain::{Command, EventBus, Transport};

    fn event(command: Command) -> PeerEvent {
        PeerEvent::CommandReceived {
            peer: SocketAddr::from(([127, 0, 0, 1], 4000)),
            transport: Transport::Tcp,
            command,
            backward_port: 0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn plain_render_is_human_readable() {
        let Ok(reporter) = EventReporter::open(false, None).await else {
            panic!("reporter open failed");
        };
        let line = reporter.render(&event(Command::Ping));
        assert!(line.ends_with("Incoming ping from 127.0.0.1:4000"));
    }

    #[tokio::test]
    async fn json_render_is_tagged() {
        let Ok(reporter) = EventReporter::open(true, None).await else {
            panic!("reporter open failed");
        };
        let line = reporter.render(&event(Command::Subscribe));
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            panic!("not json: {line}");
        };
        assert_eq!(value["event_type"], "command_received");
        assert_eq!(value["command"], "subscribe");
    }

    #[tokio::test]
    async fn run_writes_lines_and_log_file_until_bus_closes() {
        let path = std::env::temp_dir().join(format!(
            "netcom-probe-reporter-{}-{}.log",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let Ok(reporter) = EventReporter::open(false, Some(&path)).await else {
            panic!("reporter open failed");
        };

        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        bus.publish(event(Command::Subscribe));
        bus.publish(event(Command::Unsubscribe));
        drop(bus);

        let mut out = Vec::new();
        tokio_test::assert_ok!(reporter.run(rx, &mut out).await);

        let text = String::from_utf8_lossy(&out).into_owned();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("Incoming subscribe"));
        assert!(text.contains("Incoming unsubscribe"));

        let logged = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        assert_eq!(logged, text);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
