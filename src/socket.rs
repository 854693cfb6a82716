//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  Decoding happens in [`crate::Session::input`]; this module
//! owns only byte I/O, which keeps the protocol engine free of any runtime.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Largest datagram the receive path accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// An async, datagram-oriented UDP socket.
///
/// All methods take `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port; the assigned
    /// address is available from [`Socket::local_addr`].
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[socket] bound {}", local_addr);
        Ok(Self { local_addr, inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send one datagram to `dest`.
    pub async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    /// Send without waiting; a full socket buffer drops the datagram.
    ///
    /// Suits output sinks, which must not block.  A drop here is recovered by
    /// retransmission like any other loss.
    pub fn try_send_to(&self, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.try_send_to(datagram, dest)?;
        Ok(())
    }

    /// Receive the next datagram.  Returns `(bytes, sender_address)`.
    pub async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }
}
