//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// The receive loop and the send loop share one socket from different threads, so every
/// method takes `&self`. A UDP socket is the production implementation; tests can plug in
/// anything that moves whole datagrams.
pub trait DatagramSocket: Send + Sync {
    /// Sends a single datagram.
    fn send_datagram(&self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Blocks until a datagram arrives or the read timeout elapses.
    ///
    /// A timeout is reported as an `io::Error` of kind `WouldBlock` or `TimedOut`.
    fn receive_datagram(&self, buffer: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Returns the address the socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;
}
