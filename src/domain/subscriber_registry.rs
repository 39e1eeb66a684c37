//! Concurrent store of subscribed peers.
//!
//! [`SubscriberRegistry`] tracks every peer that has subscribed to the
//! listener, keyed by its socket address. TCP connection tasks and the UDP
//! receive loop share one registry behind a [`tokio::sync::RwLock`].

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::Transport;

/// A subscribed peer with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscriber {
    /// Remote address of the peer.
    pub peer: SocketAddr,
    /// Transport the peer subscribed over.
    pub transport: Transport,
    /// Port the peer wants replies on (0 when not advertised).
    pub backward_port: u16,
    /// Time of the subscribe.
    pub subscribed_at: DateTime<Utc>,
    /// Time of the most recent command from this peer.
    pub last_seen_at: DateTime<Utc>,
    /// Number of pings received since subscribing.
    pub ping_count: u64,
}

/// Central store for all subscribed peers.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    peers: RwLock<HashMap<SocketAddr, Subscriber>>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer` as a subscriber.
    ///
    /// Returns `false` if the peer was already subscribed; the existing
    /// entry keeps its subscribe time but takes the new backward port and
    /// has its last-seen time refreshed.
    pub async fn subscribe(
        &self,
        peer: SocketAddr,
        transport: Transport,
        backward_port: u16,
    ) -> bool {
        let now = Utc::now();
        let mut map = self.peers.write().await;
        if let Some(existing) = map.get_mut(&peer) {
            existing.backward_port = backward_port;
            existing.last_seen_at = now;
            return false;
        }
        map.insert(
            peer,
            Subscriber {
                peer,
                transport,
                backward_port,
                subscribed_at: now,
                last_seen_at: now,
                ping_count: 0,
            },
        );
        true
    }

    /// Removes `peer`, returning its entry if it was subscribed.
    pub async fn unsubscribe(&self, peer: SocketAddr) -> Option<Subscriber> {
        self.peers.write().await.remove(&peer)
    }

    /// Records a ping from `peer`.
    ///
    /// Returns `false` if the peer is not subscribed.
    pub async fn touch(&self, peer: SocketAddr) -> bool {
        let mut map = self.peers.write().await;
        let Some(entry) = map.get_mut(&peer) else {
            return false;
        };
        entry.last_seen_at = Utc::now();
        entry.ping_count = entry.ping_count.saturating_add(1);
        true
    }

    /// Returns the entry for `peer`, if subscribed.
    pub async fn get(&self, peer: SocketAddr) -> Option<Subscriber> {
        self.peers.read().await.get(&peer).cloned()
    }

    /// Returns all subscribers ordered by subscribe time.
    pub async fn list(&self) -> Vec<Subscriber> {
        let map = self.peers.read().await;
        let mut subscribers: Vec<Subscriber> = map.values().cloned().collect();
        subscribers.sort_by_key(|s| s.subscribed_at);
        subscribers
    }

    /// Returns the number of subscribers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Returns `true` if nobody is subscribed.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn subscribe_and_get() {
        let registry = SubscriberRegistry::new();
        assert!(registry.subscribe(addr(1), Transport::Tcp, 0).await);

        let Some(entry) = registry.get(addr(1)).await else {
            panic!("subscriber missing");
        };
        assert_eq!(entry.transport, Transport::Tcp);
        assert_eq!(entry.ping_count, 0);
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_reported() {
        let registry = SubscriberRegistry::new();
        assert!(registry.subscribe(addr(1), Transport::Udp, 4000).await);
        assert!(!registry.subscribe(addr(1), Transport::Udp, 4001).await);
        assert_eq!(registry.len().await, 1);

        let backward_port = registry.get(addr(1)).await.map(|s| s.backward_port);
        assert_eq!(backward_port, Some(4001));
    }

    #[tokio::test]
    async fn touch_counts_pings() {
        let registry = SubscriberRegistry::new();
        assert!(!registry.touch(addr(1)).await);

        registry.subscribe(addr(1), Transport::Udp, 0).await;
        assert!(registry.touch(addr(1)).await);
        assert!(registry.touch(addr(1)).await);

        let ping_count = registry.get(addr(1)).await.map(|s| s.ping_count);
        assert_eq!(ping_count, Some(2));
    }

    #[tokio::test]
    async fn unsubscribe_removes_peer() {
        let registry = SubscriberRegistry::new();
        registry.subscribe(addr(1), Transport::Tcp, 0).await;

        assert!(registry.unsubscribe(addr(1)).await.is_some());
        assert!(registry.unsubscribe(addr(1)).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn list_returns_all() {
        let registry = SubscriberRegistry::new();
        registry.subscribe(addr(1), Transport::Tcp, 0).await;
        registry.subscribe(addr(2), Transport::Udp, 0).await;

        let peers: Vec<SocketAddr> = registry.list().await.iter().map(|s| s.peer).collect();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&addr(1)));
        assert!(peers.contains(&addr(2)));
    }
}
