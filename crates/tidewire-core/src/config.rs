use std::{
    default::Default,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use crate::{constants::DEFAULT_MAX_PACKET_SIZE, stream::TextEncoding};

/// What the send path does when the outbound work queue is full.
///
/// Enqueueing never blocks the caller; one of the two messages is dropped instead.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued message to make room for the new one.
    DropOldest,
    /// Discard the message being enqueued.
    DropNewest,
}

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
pub struct Config {
    /// Address the transport socket binds to.
    pub bind_address: SocketAddr,
    /// Max total datagram size in bytes, header included.
    pub max_packet_size: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Interval between handshake datagrams while a client is unconnected.
    pub handshake_interval: Duration,
    /// Time after which an unanswered handshake is reported. Retrying continues.
    pub handshake_timeout: Duration,
    /// Interval between keep-alive pings once a client is connected.
    pub ping_interval: Duration,
    /// Minimum time before an unacknowledged reliable datagram is resent.
    pub retry_interval: Duration,
    /// Transmissions allowed for a reliable datagram before it is abandoned.
    pub max_retry_attempts: u32,
    /// Max idle time before the server drops a peer.
    pub idle_connection_timeout: Duration,
    /// Max clients a server accepts at once (1-65535). Bounds the peer id pool.
    pub max_peers: usize,
    /// Encoding used for strings written to a `BinaryStream`.
    pub text_encoding: TextEncoding,
    /// Capacity of the outbound work queue.
    pub send_queue_capacity: usize,
    /// Behavior when the outbound work queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Number of idle streams kept for reuse.
    pub stream_pool_size: usize,
    /// Max out-of-order packets buffered per ordered channel.
    pub reorder_buffer_limit: usize,
    /// Smoothing factor (0..1) for RTT and clock offset measurements.
    pub rtt_smoothing_factor: f32,
    /// Socket read timeout; bounds how long shutdown waits on the receive loop.
    pub receive_poll_timeout: Duration,
    /// How often the send loop services its timers when the queue is idle.
    pub send_tick: Duration,
    /// Number of lock shards used by the concurrent channel and retry maps.
    pub lock_shards: usize,
}

impl Config {
    /// Returns the default configuration bound to the given address.
    pub fn bound_to(bind_address: SocketAddr) -> Self {
        Self { bind_address, ..Self::default() }
    }

    /// Returns the largest payload a single datagram can carry on a reliable channel.
    pub fn max_payload_size(&self) -> usize {
        self.max_packet_size.saturating_sub(crate::constants::SEQUENCED_HEADER_SIZE)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            socket_recv_buffer_size: None, // Use system default
            socket_send_buffer_size: None, // Use system default
            handshake_interval: Duration::from_millis(200),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(1),
            retry_interval: Duration::from_millis(200),
            max_retry_attempts: 15,
            idle_connection_timeout: Duration::from_secs(10),
            max_peers: usize::from(u16::MAX),
            text_encoding: TextEncoding::Utf8,
            send_queue_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
            stream_pool_size: 64,
            reorder_buffer_limit: 1024,
            rtt_smoothing_factor: 0.10,
            receive_poll_timeout: Duration::from_millis(50),
            send_tick: Duration::from_millis(20),
            lock_shards: 16,
        }
    }
}
