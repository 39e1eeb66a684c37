//! The probe's single outbound connection.
//!
//! [`ProbeConnection`] owns the socket for the lifetime of a probe run and
//! guarantees the farewell (Unsubscribe) message is attempted exactly once:
//! either through [`ProbeConnection::release`], or, if the owner never gets
//! there, through a non-blocking best-effort write in `Drop`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use crate::domain::Transport;
use crate::error::ProbeError;

#[derive(Debug)]
enum Socket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Scoped owner of the probe socket.
#[derive(Debug)]
pub struct ProbeConnection {
    socket: Option<Socket>,
    peer: SocketAddr,
    farewell: Bytes,
}

impl ProbeConnection {
    /// Resolves `host` and connects with the selected transport.
    ///
    /// For TCP every resolved address is tried in order. For UDP an
    /// ephemeral socket of the first address's family is bound and its
    /// default destination fixed; no packet is sent.
    ///
    /// `farewell` is the encoded message sent when the connection is
    /// released or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Resolve`] if the host does not resolve and
    /// [`ProbeError::Connect`] if no address accepts the connection.
    pub async fn connect(
        transport: Transport,
        host: &str,
        port: u16,
        farewell: Bytes,
    ) -> Result<Self, ProbeError> {
        let resolve_err = |source| ProbeError::Resolve {
            host: host.to_string(),
            port,
            source,
        };
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(resolve_err)?
            .collect();
        if addrs.is_empty() {
            return Err(resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                "no addresses found",
            )));
        }

        let mut last_err = None;
        for addr in addrs {
            let attempt = match transport {
                Transport::Tcp => connect_tcp(addr).await,
                Transport::Udp => connect_udp(addr).await,
            };
            match attempt {
                Ok(socket) => {
                    tracing::debug!(%transport, peer = %addr, "connected");
                    return Ok(Self {
                        socket: Some(socket),
                        peer: addr,
                        farewell,
                    });
                }
                Err(err) => {
                    tracing::debug!(%transport, peer = %addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(ProbeError::Connect(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no address connected")
        })))
    }

    /// Remote address the connection is bound to.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends one encoded message.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Send`] if the socket rejects the write, or if
    /// the connection was already released.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), ProbeError> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(ProbeError::Send(io::Error::from(io::ErrorKind::NotConnected)));
        };
        match socket {
            Socket::Tcp(stream) => stream.write_all(message).await.map_err(ProbeError::Send),
            Socket::Udp(sock) => {
                let sent = sock.send(message).await.map_err(ProbeError::Send)?;
                if sent == message.len() {
                    Ok(())
                } else {
                    Err(ProbeError::Send(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated to {sent} of {} bytes", message.len()),
                    )))
                }
            }
        }
    }

    /// Sends the farewell message and closes the socket.
    ///
    /// The socket is closed whether or not the farewell got through.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Send`] if the farewell could not be sent.
    pub async fn release(mut self) -> Result<(), ProbeError> {
        let farewell = self.farewell.clone();
        let result = self.send(&farewell).await;
        if let Some(Socket::Tcp(mut stream)) = self.socket.take()
            && let Err(err) = stream.shutdown().await
        {
            tracing::debug!(error = %err, "tcp shutdown failed");
        }
        result
    }
}

impl Drop for ProbeConnection {
    fn drop(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        let result = match &socket {
            Socket::Tcp(stream) => stream.try_write(&self.farewell),
            Socket::Udp(sock) => sock.try_send(&self.farewell),
        };
        match result {
            Ok(_) => tracing::debug!(peer = %self.peer, "farewell sent on drop"),
            Err(err) => tracing::debug!(peer = %self.peer, error = %err, "farewell on drop failed"),
        }
    }
}

async fn connect_tcp(addr: SocketAddr) -> io::Result<Socket> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(Socket::Tcp(stream))
}

async fn connect_udp(addr: SocketAddr) -> io::Result<Socket> {
    let local: IpAddr = match addr {
        SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
        SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
    };
    let sock = UdpSocket::bind(SocketAddr::new(local, 0)).await?;
    sock.connect(addr).await?;
    Ok(Socket::Udp(sock))
}
