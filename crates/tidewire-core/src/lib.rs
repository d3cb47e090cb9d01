#![warn(missing_docs)]

//! tidewire-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - The fixed-capacity binary stream every packet and value is framed with
//! - Memory utilities (object pooling, shared byte slices, sharded maps)
//!
//! Protocol-specific logic lives in specialized crates:
//! - `tidewire-protocol`: channel kinds, framing codec, handshake payloads, retry bookkeeping
//! - `tidewire-peer`: peer registry and per-channel reliability state
//! - `tidewire-host`: the threaded transport, diagnostics and handler dispatch

/// Protocol constants shared across layers.
pub mod constants {
    /// Size of the header carried by every datagram: channel, target, operation and peer id.
    pub const HEADER_SIZE: usize = 5;
    /// Size of the header on reliable channels, which append a 32-bit sequence.
    pub const SEQUENCED_HEADER_SIZE: usize = HEADER_SIZE + 4;
    /// Default maximum datagram size, chosen to stay under common path MTUs.
    pub const DEFAULT_MAX_PACKET_SIZE: usize = 512;
    /// Peer id reserved for the server (and for "no peer").
    pub const SERVER_PEER_ID: u16 = 0;
    /// Maximum number of bytes a 32-bit 7-bit encoded integer may occupy.
    pub const MAX_VARINT_LEN: usize = 5;
    /// First sequence number handed out on a reliable channel; 0 means "no sequence".
    pub const FIRST_SEQUENCE: i32 = 1;
}

/// Peer identifier assigned by the server during the handshake.
pub type PeerId = u16;

/// Configuration options for the protocol and runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Bounded object pooling with scoped release.
pub mod pool;
/// Key-sharded concurrent map.
pub mod sharded;
/// Shared, reference-counted byte slices with zero-copy slicing.
pub mod shared;
/// Fixed-capacity binary stream with cursor-based codecs.
pub mod stream;
/// Transport abstraction for pluggable I/O.
pub mod transport;

pub use error::{DecodingErrorKind, ErrorKind, Result};
pub use stream::{BinaryStream, TextEncoding};
