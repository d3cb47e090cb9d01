use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
};

use socket2::Socket as Socket2;
use tidewire_core::{config::Config, error::Result, transport::DatagramSocket};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    // Create socket2::Socket from UdpSocket for advanced options
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }

    // Blocking reads with a timeout so the receive loop can notice shutdown.
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(config.receive_poll_timeout))?;
    Ok(())
}

/// UDP socket shared by the receive and send loops.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    /// Binds to `config.bind_address` and applies the configured socket options.
    pub fn bind(config: &Config) -> Result<Self> {
        Self::bind_to(config.bind_address, config)
    }

    /// Binds to `addresses` and applies the configured socket options.
    pub fn bind_to<A: ToSocketAddrs>(addresses: A, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::from_socket(socket, config)
    }

    /// Wraps an already bound socket.
    pub fn from_socket(socket: UdpSocket, config: &Config) -> Result<Self> {
        apply_socket_options(&socket, config)?;
        Ok(Self { socket })
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_datagram(&self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_datagram(&self, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buffer)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Address a socket bound to `local` can reach itself on.
///
/// Wildcard binds are mapped to the loopback address of the same family.
pub fn loopback_for(local: SocketAddr) -> SocketAddr {
    match local {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        }
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        }
        other => other,
    }
}

/// True for errors a read timeout produces.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
