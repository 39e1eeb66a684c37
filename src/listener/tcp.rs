//! TCP serve loop: one task per accepted stream.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::context::ListenerContext;
use crate::domain::Transport;

/// Longest a reply may wait on a peer that is not reading.
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Accepts streams until `shutdown` completes, then stops every open
/// connection and waits for each to report its disconnect.
pub(super) async fn serve<F>(listener: TcpListener, ctx: Arc<ListenerContext>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if ctx.admits(peer) {
                        connections.spawn(handle_stream(
                            stream,
                            peer,
                            Arc::clone(&ctx),
                            stop_rx.clone(),
                        ));
                    }
                }
                Err(err) => tracing::warn!(error = %err, "accept failed"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    tracing::warn!(error = %err, "connection task failed");
                }
            }
        }
    }

    let _ = stop_tx.send(true);
    while let Some(joined) = connections.join_next().await {
        if let Err(err) = joined {
            tracing::warn!(error = %err, "connection task failed");
        }
    }
}

async fn handle_stream(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ListenerContext>,
    mut stop: watch::Receiver<bool>,
) {
    ctx.connected(peer, Transport::Tcp).await;
    let mut decoder = ctx.decoder();
    let mut buf = [0u8; 1024];
    let mut replying = true;

    loop {
        let read = tokio::select! {
            _ = stop.changed() => break,
            read = stream.read(&mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                let data = buf.get(..n).unwrap_or_default();
                let outcome = ctx.feed(peer, Transport::Tcp, &mut decoder, data).await;
                if replying && let Some(reply) = outcome.reply {
                    replying = write_reply(&mut stream, peer, &reply).await;
                }
            }
            Err(err) => {
                tracing::warn!(%peer, error = %err, "read failed");
                break;
            }
        }
    }

    ctx.disconnected(peer, Transport::Tcp).await;
}

/// Writes one reply. Returns `false` once the peer stops draining its
/// socket, after which no more replies are sent on this stream.
async fn write_reply(stream: &mut TcpStream, peer: SocketAddr, reply: &[u8]) -> bool {
    match tokio::time::timeout(REPLY_TIMEOUT, stream.write_all(reply)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::debug!(%peer, error = %err, "reply failed");
            true
        }
        Err(_) => {
            tracing::warn!(%peer, "peer is not reading replies, replies stopped");
            false
        }
    }
}
