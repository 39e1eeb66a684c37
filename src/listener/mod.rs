//! Subscription listener: the probe's counterpart.
//!
//! Binds one TCP or UDP socket, decodes probe commands from every peer,
//! keeps a [`SubscriberRegistry`] current, answers Pings with the client
//! list, and publishes a [`PeerEvent`] for each step on the [`EventBus`].
//!
//! [`PeerEvent`]: crate::domain::PeerEvent

pub mod context;
pub mod reporter;
mod tcp;
mod udp;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};

use crate::config::ListenConfig;
use crate::domain::{EventBus, SubscriberRegistry, Transport};
use crate::error::ProbeError;

pub use context::{FeedOutcome, ListenerContext};
pub use reporter::EventReporter;

#[derive(Debug)]
enum ListenSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// A bound listener, ready to [`run`](Listener::run).
#[derive(Debug)]
pub struct Listener {
    socket: ListenSocket,
    ctx: Arc<ListenerContext>,
}

impl Listener {
    /// Binds the socket described by `config`. Events go to `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Bind`] if the address is unavailable.
    pub async fn bind(config: &ListenConfig, bus: EventBus) -> Result<Self, ProbeError> {
        let addr = config.bind_addr;
        let bind_err = |source| ProbeError::Bind {
            addr: format!("{}://{addr}", config.transport),
            source,
        };
        let socket = match config.transport {
            Transport::Tcp => ListenSocket::Tcp(TcpListener::bind(addr).await.map_err(bind_err)?),
            Transport::Udp => ListenSocket::Udp(UdpSocket::bind(addr).await.map_err(bind_err)?),
        };
        let ctx = ListenerContext::new(bus, config.encoding, config.accept_only)
            .with_idle_timeout(config.peer_timeout);
        Ok(Self {
            socket,
            ctx: Arc::new(ctx),
        })
    }

    /// Transport this listener serves.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        match self.socket {
            ListenSocket::Tcp(_) => Transport::Tcp,
            ListenSocket::Udp(_) => Transport::Udp,
        }
    }

    /// Address actually bound, useful after binding port 0.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Io`] if the OS cannot report the address.
    pub fn local_addr(&self) -> Result<SocketAddr, ProbeError> {
        let addr = match &self.socket {
            ListenSocket::Tcp(listener) => listener.local_addr()?,
            ListenSocket::Udp(socket) => socket.local_addr()?,
        };
        Ok(addr)
    }

    /// Shared handle to the subscriber registry.
    #[must_use]
    pub fn registry(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(self.ctx.registry())
    }

    /// Serves peers until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let transport = self.transport();
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%transport, %addr, "listener running");
        }
        match self.socket {
            ListenSocket::Tcp(listener) => tcp::serve(listener, self.ctx, shutdown).await,
            ListenSocket::Udp(socket) => udp::serve(socket, self.ctx, shutdown).await,
        }
        tracing::info!(%transport, "listener stopped");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::sync::{broadcast, oneshot};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::client::Probe;
    use crate::config::ProbeConfig;
    use crate::domain::{Command, PeerEvent};
    use crate::protocol::{Encoding, Reply};

    fn listen_config(transport: Transport, encoding: Encoding) -> ListenConfig {
        ListenConfig {
            transport,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            accept_only: None,
            encoding,
            event_bus_capacity: 256,
            json: false,
            log_file: None,
            peer_timeout: None,
        }
    }

    fn probe_config(transport: Transport, port: u16, encoding: Encoding) -> ProbeConfig {
        ProbeConfig {
            transport,
            address: "127.0.0.1".to_string(),
            port,
            interval: Duration::from_millis(20),
            encoding,
            backward_port: 0,
        }
    }

    /// Collects events until the probe's peer disconnects, cancelling the
    /// probe once `pings` pings have been seen.
    async fn collect_session(
        mut rx: broadcast::Receiver<PeerEvent>,
        pings: usize,
        cancel: oneshot::Sender<()>,
    ) -> Vec<PeerEvent> {
        let mut cancel = Some(cancel);
        let mut seen = Vec::new();
        while let Ok(event) = rx.recv().await {
            let done = event.event_type_str() == "peer_disconnected";
            seen.push(event);
            let ping_count = seen
                .iter()
                .filter(|e| e.command() == Some(Command::Ping))
                .count();
            if ping_count >= pings
                && let Some(tx) = cancel.take()
            {
                let _ = tx.send(());
            }
            if done {
                break;
            }
        }
        seen
    }

    async fn run_session(transport: Transport, encoding: Encoding) -> Vec<PeerEvent> {
        let bus = EventBus::new(256);
        let rx = bus.subscribe();
        let Ok(listener) = Listener::bind(&listen_config(transport, encoding), bus).await else {
            panic!("listener bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        let registry = listener.registry();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let collector = tokio::spawn(collect_session(rx, 3, cancel_tx));

        let probe = Probe::new(
            probe_config(transport, addr.port(), encoding),
            std::io::sink(),
        );
        let shutdown = async move {
            let _ = cancel_rx.await;
        };
        let Ok(report) = probe.run(shutdown).await else {
            panic!("probe failed");
        };
        assert!(report.unsubscribed);

        let Ok(Ok(events)) = tokio::time::timeout(Duration::from_secs(10), collector).await else {
            panic!("collector did not finish");
        };
        assert!(registry.is_empty().await);

        let _ = stop_tx.send(());
        let _ = server.await;
        events
    }

    fn assert_session_shape(events: &[PeerEvent]) {
        assert_eq!(events.first().map(PeerEvent::event_type_str), Some("peer_connected"));
        assert_eq!(events.last().map(PeerEvent::event_type_str), Some("peer_disconnected"));

        let commands: Vec<Command> = events.iter().filter_map(PeerEvent::command).collect();
        assert_eq!(commands.first(), Some(&Command::Subscribe));
        assert_eq!(commands.last(), Some(&Command::Unsubscribe));
        let middle = commands.get(1..commands.len().saturating_sub(1)).unwrap_or_default();
        assert!(middle.len() >= 3);
        assert!(middle.iter().all(|c| *c == Command::Ping));
    }

    #[tokio::test]
    async fn tcp_listener_sees_full_probe_session() {
        let events = run_session(Transport::Tcp, Encoding::Byte).await;
        assert_session_shape(&events);
    }

    #[tokio::test]
    async fn udp_listener_sees_full_framed_probe_session() {
        let events = run_session(Transport::Udp, Encoding::Framed).await;
        assert_session_shape(&events);
    }

    #[tokio::test]
    async fn bind_conflict_is_bind_error() {
        let config = listen_config(Transport::Tcp, Encoding::Byte);
        let Ok(first) = Listener::bind(&config, EventBus::new(4)).await else {
            panic!("first bind failed");
        };
        let Ok(taken) = first.local_addr() else {
            panic!("no local addr");
        };

        let mut config = config;
        config.bind_addr = taken;
        let result = Listener::bind(&config, EventBus::new(4)).await;
        assert!(matches!(result, Err(ProbeError::Bind { .. })));
        assert_eq!(first.transport(), Transport::Tcp);
    }

    struct Running {
        addr: SocketAddr,
        registry: Arc<SubscriberRegistry>,
        events: broadcast::Receiver<PeerEvent>,
        stop: oneshot::Sender<()>,
        server: JoinHandle<()>,
    }

    async fn start(config: ListenConfig) -> Running {
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        let Ok(listener) = Listener::bind(&config, bus).await else {
            panic!("listener bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        let registry = listener.registry();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.run(async move {
            let _ = stop_rx.await;
        }));
        Running {
            addr,
            registry,
            events,
            stop,
            server,
        }
    }

    async fn wait_for_len(registry: &SubscriberRegistry, len: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while registry.len().await != len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "registry never reached {len} entries");
    }

    async fn next_of_type(rx: &mut broadcast::Receiver<PeerEvent>, kind: &str) -> PeerEvent {
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.event_type_str() == kind => return Some(event),
                    Ok(_) => {}
                    Err(_) => return None,
                }
            }
        })
        .await;
        let Ok(Some(event)) = found else {
            panic!("no {kind} event");
        };
        event
    }

    #[tokio::test]
    async fn tcp_peer_is_registered_on_connect() {
        let running = start(listen_config(Transport::Tcp, Encoding::Byte)).await;
        let Ok(mut stream) = TcpStream::connect(running.addr).await else {
            panic!("connect failed");
        };
        let Ok(local) = stream.local_addr() else {
            panic!("no local addr");
        };
        wait_for_len(&running.registry, 1).await;

        tokio_test::assert_ok!(stream.write_all(&[Command::Ping.code()]).await);
        let counted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let pings = running.registry.get(local).await.map(|s| s.ping_count);
                if pings == Some(1) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(counted.is_ok(), "ping was not counted");

        drop(stream);
        wait_for_len(&running.registry, 0).await;
        let _ = running.stop.send(());
        let _ = running.server.await;
    }

    #[tokio::test]
    async fn tcp_ping_is_answered_with_client_list() {
        let running = start(listen_config(Transport::Tcp, Encoding::Byte)).await;
        let Ok(stream) = TcpStream::connect(running.addr).await else {
            panic!("connect failed");
        };
        let Ok(local) = stream.local_addr() else {
            panic!("no local addr");
        };
        let mut reader = BufReader::new(stream);

        tokio_test::assert_ok!(reader.get_mut().write_all(&[Command::Ping.code()]).await);
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line)).await;
        assert!(matches!(read, Ok(Ok(n)) if n > 0), "no reply line");

        let Ok(reply) = Reply::decode(line.as_bytes()) else {
            panic!("reply does not decode: {line:?}");
        };
        let listed: Vec<SocketAddr> = reply
            .clients()
            .iter()
            .map(|c| SocketAddr::new(c.address, c.port))
            .collect();
        assert_eq!(listed, vec![local]);

        let _ = running.stop.send(());
        let _ = running.server.await;
    }

    #[tokio::test]
    async fn udp_ping_is_answered_on_backward_port() {
        let running = start(listen_config(Transport::Udp, Encoding::Framed)).await;
        let (Ok(sender), Ok(replies)) = (
            tokio::net::UdpSocket::bind("127.0.0.1:0").await,
            tokio::net::UdpSocket::bind("127.0.0.1:0").await,
        ) else {
            panic!("bind failed");
        };
        let (Ok(sender_addr), Ok(reply_addr)) = (sender.local_addr(), replies.local_addr()) else {
            panic!("no local addr");
        };

        let port = reply_addr.port();
        for command in [Command::Subscribe, Command::Ping] {
            let frame = Encoding::Framed.encode(command, port);
            tokio_test::assert_ok!(sender.send_to(&frame, running.addr).await);
        }

        let mut buf = [0u8; 4096];
        let received = tokio::time::timeout(Duration::from_secs(5), replies.recv_from(&mut buf)).await;
        let Ok(Ok((n, _))) = received else {
            panic!("no reply datagram");
        };
        let Ok(reply) = Reply::decode(buf.get(..n).unwrap_or_default()) else {
            panic!("reply does not decode");
        };
        let ports: Vec<u16> = reply.clients().iter().map(|c| c.port).collect();
        assert_eq!(ports, vec![sender_addr.port()]);

        let _ = running.stop.send(());
        let _ = running.server.await;
    }

    #[tokio::test]
    async fn tcp_shutdown_reports_open_connections() {
        let mut running = start(listen_config(Transport::Tcp, Encoding::Byte)).await;
        let Ok(stream) = TcpStream::connect(running.addr).await else {
            panic!("connect failed");
        };
        let Ok(local) = stream.local_addr() else {
            panic!("no local addr");
        };
        wait_for_len(&running.registry, 1).await;

        let _ = running.stop.send(());
        let Ok(Ok(())) = tokio::time::timeout(Duration::from_secs(5), running.server).await else {
            panic!("listener did not stop");
        };
        assert!(running.registry.is_empty().await);

        let event = next_of_type(&mut running.events, "peer_disconnected").await;
        assert_eq!(event.peer(), local);
        drop(stream);
    }

    #[tokio::test]
    async fn silent_udp_peer_is_evicted() {
        let mut config = listen_config(Transport::Udp, Encoding::Byte);
        config.peer_timeout = Some(Duration::from_millis(200));
        let mut running = start(config).await;

        let Ok(sender) = tokio::net::UdpSocket::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        tokio_test::assert_ok!(
            sender
                .send_to(&[Command::Subscribe.code()], running.addr)
                .await
        );
        wait_for_len(&running.registry, 1).await;

        let event = next_of_type(&mut running.events, "peer_disconnected").await;
        assert_eq!(Some(event.peer()), sender.local_addr().ok());
        assert!(running.registry.is_empty().await);

        let _ = running.stop.send(());
        let _ = running.server.await;
    }
}
