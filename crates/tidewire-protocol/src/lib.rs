#![warn(missing_docs)]

//! tidewire-protocol: wire enums, datagram framing and delivery bookkeeping.

/// Channel kinds, targets and operations.
pub mod channel;
/// Datagram header encoding and decoding.
pub mod framing;
/// Handshake request and reply payloads.
pub mod handshake;
/// RTT and clock offset estimation.
pub mod latency;
/// Reliable datagrams awaiting acknowledgement.
pub mod outstanding;

pub use channel::{ChannelKind, Operation, Target};
pub use framing::{FramingDecoder, FramingEncoder, PacketHeader};
pub use handshake::{ConnectReply, ConnectRequest};
pub use latency::LatencyEstimator;
pub use outstanding::{DueDeliveries, OutstandingDeliveries, RelayEntry};
