//! State shared by every listener task.
//!
//! [`ListenerContext`] applies the address filter, turns decoded frames into
//! registry updates, publishes a [`PeerEvent`] for each step, and builds the
//! client-list reply owed to a peer that pings.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use crate::domain::{Command, EventBus, PeerEvent, SubscriberRegistry, Transport};
use crate::protocol::{Encoding, Frame, FrameDecoder, Reply};

/// What a call to [`ListenerContext::feed`] asks the serve loop to do.
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// An Unsubscribe was among the decoded frames.
    pub unsubscribed: bool,
    /// Client list to send back, present when a Ping was decoded.
    pub reply: Option<Bytes>,
}

/// Registry, event bus and policy shared by the TCP and UDP serve loops.
#[derive(Debug)]
pub struct ListenerContext {
    registry: Arc<SubscriberRegistry>,
    bus: EventBus,
    encoding: Encoding,
    accept_only: Option<IpAddr>,
    idle_timeout: Option<Duration>,
}

impl ListenerContext {
    /// Creates a context with an empty registry and no idle timeout.
    #[must_use]
    pub fn new(bus: EventBus, encoding: Encoding, accept_only: Option<IpAddr>) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::new()),
            bus,
            encoding,
            accept_only,
            idle_timeout: None,
        }
    }

    /// Sets how long a UDP peer may stay silent before it is dropped.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout.filter(|t| !t.is_zero());
        self
    }

    /// Returns the shared subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Returns the UDP idle timeout, if any.
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Returns a fresh decoder for the configured encoding.
    #[must_use]
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.encoding)
    }

    /// Returns `true` if `peer` passes the address filter.
    ///
    /// A rejected peer is logged and published as
    /// [`PeerEvent::PeerDiscarded`].
    pub fn admits(&self, peer: SocketAddr) -> bool {
        let Some(expected) = self.accept_only else {
            return true;
        };
        if peer.ip() == expected {
            return true;
        }
        tracing::warn!(%peer, %expected, "discarding peer outside address filter");
        self.bus.publish(PeerEvent::PeerDiscarded {
            peer,
            expected,
            timestamp: Utc::now(),
        });
        false
    }

    /// Records a new peer.
    ///
    /// A TCP peer is registered for as long as its connection lasts. A UDP
    /// peer is registered only once it subscribes.
    pub async fn connected(&self, peer: SocketAddr, transport: Transport) {
        if transport == Transport::Tcp {
            self.registry.subscribe(peer, transport, 0).await;
        }
        tracing::info!(%peer, %transport, "peer connected");
        self.bus.publish(PeerEvent::PeerConnected {
            peer,
            transport,
            timestamp: Utc::now(),
        });
    }

    /// Records a departed peer and drops any registration it left behind.
    pub async fn disconnected(&self, peer: SocketAddr, transport: Transport) {
        if self.registry.unsubscribe(peer).await.is_some() {
            tracing::debug!(%peer, "registration dropped on disconnect");
        }
        tracing::info!(%peer, %transport, "peer disconnected");
        self.bus.publish(PeerEvent::PeerDisconnected {
            peer,
            transport,
            timestamp: Utc::now(),
        });
    }

    /// Feeds received bytes through `decoder` and dispatches every complete
    /// frame.
    ///
    /// Several Pings in one read earn a single reply.
    pub async fn feed(
        &self,
        peer: SocketAddr,
        transport: Transport,
        decoder: &mut FrameDecoder,
        data: &[u8],
    ) -> FeedOutcome {
        decoder.push(data);
        let mut outcome = FeedOutcome::default();
        let mut pinged = false;
        while let Some(decoded) = decoder.next_frame() {
            match decoded {
                Ok(frame) => {
                    outcome.unsubscribed |= frame.command == Command::Unsubscribe;
                    pinged |= frame.command == Command::Ping;
                    self.dispatch(peer, transport, frame).await;
                }
                Err(err) => {
                    tracing::warn!(%peer, error = %err, "undecodable bytes");
                    self.bus.publish(PeerEvent::FrameRejected {
                        peer,
                        reason: err.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        if pinged {
            outcome.reply = self.client_list().await;
        }
        outcome
    }

    /// Where a UDP reply for `peer` goes: its IP at the backward port it
    /// subscribed with. `None` while unsubscribed or without a port.
    pub async fn reply_addr(&self, peer: SocketAddr) -> Option<SocketAddr> {
        let subscriber = self.registry.get(peer).await?;
        (subscriber.backward_port != 0).then_some(SocketAddr::new(peer.ip(), subscriber.backward_port))
    }

    async fn client_list(&self) -> Option<Bytes> {
        let subscribers = self.registry.list().await;
        match Reply::client_list(&subscribers).encode() {
            Ok(line) => Some(line),
            Err(err) => {
                tracing::warn!(error = %err, "cannot encode client list");
                None
            }
        }
    }

    async fn dispatch(&self, peer: SocketAddr, transport: Transport, frame: Frame) {
        let Frame {
            command,
            backward_port,
        } = frame;
        match (command, transport) {
            (Command::Subscribe, _) => {
                if !self.registry.subscribe(peer, transport, backward_port).await {
                    tracing::debug!(%peer, "already registered");
                }
            }
            (Command::Ping, _) => {
                if !self.registry.touch(peer).await {
                    tracing::warn!(%peer, "ping from peer that never subscribed");
                }
            }
            (Command::Unsubscribe, Transport::Tcp) => {
                tracing::debug!(%peer, "tcp peer stays registered until it disconnects");
            }
            (Command::Unsubscribe, Transport::Udp) => {
                if self.registry.unsubscribe(peer).await.is_none() {
                    tracing::debug!(%peer, "unsubscribe from unknown peer");
                }
            }
        }
        tracing::info!(%peer, %command, backward_port, "command received");
        self.bus.publish(PeerEvent::CommandReceived {
            peer,
            transport,
            command,
            backward_port,
            timestamp: Utc::now(),
        });
    }
}
