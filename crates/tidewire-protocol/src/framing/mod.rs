//! Datagram framing.
//!
//! Every datagram starts with `[channel u8][target u8][operation u8][peer_id u16 LE]`.
//! Reliable channels follow it with `[sequence i32 LE]`; the payload fills the rest.
//!
//! # Module Organization
//!
//! - [`encoder`] - writes headers and whole datagrams
//! - [`decoder`] - validates and reads headers from received bytes

pub mod decoder;
pub mod encoder;

#[cfg(test)]
mod tests;

pub use decoder::FramingDecoder;
pub use encoder::FramingEncoder;

use tidewire_core::PeerId;

use crate::channel::{ChannelKind, Operation, Target};

/// Decoded datagram header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Delivery guarantee of the datagram.
    pub channel: ChannelKind,
    /// Addressing mode.
    pub target: Target,
    /// What the datagram does.
    pub operation: Operation,
    /// Destination, originator or assigned id depending on direction and operation.
    pub peer_id: PeerId,
    /// Present iff the channel is reliable.
    pub sequence: Option<i32>,
}

impl PacketHeader {
    /// Creates a header without a sequence.
    pub fn new(
        channel: ChannelKind,
        target: Target,
        operation: Operation,
        peer_id: PeerId,
    ) -> Self {
        Self { channel, target, operation, peer_id, sequence: None }
    }

    /// Attaches a sequence number.
    pub fn with_sequence(mut self, sequence: i32) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Encoded size of this header.
    pub fn size(&self) -> usize {
        self.channel.header_size()
    }
}
