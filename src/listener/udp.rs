//! UDP serve loop: one socket, one decode buffer per peer.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{Instant, MissedTickBehavior};

use super::context::ListenerContext;
use crate::domain::Transport;
use crate::protocol::FrameDecoder;

const MAX_DATAGRAM: usize = 65_536;

/// Sweep period used when idle eviction is off; the sweep branch is
/// disabled then, the timer only has to exist.
const IDLE_SWEEP_OFF: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct UdpPeer {
    decoder: FrameDecoder,
    last_seen: Instant,
}

/// Receives datagrams until `shutdown` completes.
///
/// A peer appears with its first datagram and leaves when it unsubscribes
/// or, with an idle timeout set, when it has been silent for that long.
/// Peers still present at shutdown are reported as disconnected.
///
/// A Ping from a peer that subscribed with a backward port is answered with
/// the client list, sent to that port.
pub(super) async fn serve<F>(socket: UdpSocket, ctx: Arc<ListenerContext>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut peers: HashMap<SocketAddr, UdpPeer> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let idle_timeout = ctx.idle_timeout();
    let sweep_period = idle_timeout
        .map_or(IDLE_SWEEP_OFF, |t| t / 2)
        .max(Duration::from_millis(1));
    let mut sweep = tokio::time::interval(sweep_period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => {
                    if !ctx.admits(peer) {
                        continue;
                    }
                    if !peers.contains_key(&peer) {
                        ctx.connected(peer, Transport::Udp).await;
                    }
                    let state = peers.entry(peer).or_insert_with(|| UdpPeer {
                        decoder: ctx.decoder(),
                        last_seen: Instant::now(),
                    });
                    state.last_seen = Instant::now();
                    let data = buf.get(..n).unwrap_or_default();
                    let outcome = ctx.feed(peer, Transport::Udp, &mut state.decoder, data).await;

                    if let Some(reply) = outcome.reply
                        && let Some(target) = ctx.reply_addr(peer).await
                        && let Err(err) = socket.send_to(&reply, target).await
                    {
                        tracing::debug!(%peer, %target, error = %err, "reply failed");
                    }
                    if outcome.unsubscribed {
                        peers.remove(&peer);
                        ctx.disconnected(peer, Transport::Udp).await;
                    }
                }
                // ICMP errors from earlier sends surface here on some platforms.
                Err(err) => tracing::debug!(error = %err, "recv failed"),
            },
            _ = sweep.tick(), if idle_timeout.is_some() => {
                if let Some(timeout) = idle_timeout {
                    evict_idle(&mut peers, &ctx, timeout).await;
                }
            }
        }
    }

    for peer in peers.into_keys() {
        ctx.disconnected(peer, Transport::Udp).await;
    }
}

async fn evict_idle(
    peers: &mut HashMap<SocketAddr, UdpPeer>,
    ctx: &ListenerContext,
    timeout: Duration,
) {
    let now = Instant::now();
    let mut idle = Vec::new();
    peers.retain(|peer, state| {
        let fresh = now.duration_since(state.last_seen) < timeout;
        if !fresh {
            idle.push(*peer);
        }
        fresh
    });
    for peer in idle {
        tracing::info!(%peer, ?timeout, "evicting silent peer");
        ctx.disconnected(peer, Transport::Udp).await;
    }
}
