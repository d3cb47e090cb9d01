//! Datagram decoding.
//!
//! Decoding never trusts the sender: a short datagram or an unknown enum byte is reported as
//! `MalformedPacket` and the caller drops the datagram.

use std::convert::TryFrom;

use tidewire_core::{
    constants::HEADER_SIZE,
    error::{DecodingErrorKind, ErrorKind, Result},
};

use super::PacketHeader;
use crate::channel::{ChannelKind, Operation, Target};

/// Deserializes headers from received bytes.
pub struct FramingDecoder;

impl FramingDecoder {
    /// Splits a datagram into its header and payload.
    pub fn decode(bytes: &[u8]) -> Result<(PacketHeader, &[u8])> {
        if bytes.len() < HEADER_SIZE {
            return Err(ErrorKind::MalformedPacket(DecodingErrorKind::Truncated));
        }

        let channel = ChannelKind::try_from(bytes[0])?;
        let target = Target::try_from(bytes[1])?;
        let operation = Operation::try_from(bytes[2])?;
        let peer_id = u16::from_le_bytes([bytes[3], bytes[4]]);

        let mut header = PacketHeader::new(channel, target, operation, peer_id);
        let mut offset = HEADER_SIZE;
        if channel.is_reliable() {
            let Some(raw) = bytes.get(HEADER_SIZE..HEADER_SIZE + 4) else {
                return Err(ErrorKind::MalformedPacket(DecodingErrorKind::MissingSequence));
            };
            header.sequence = Some(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
            offset += 4;
        }

        Ok((header, &bytes[offset..]))
    }

    /// Like [`FramingDecoder::decode`], but first rejects datagrams longer than `max_size`.
    ///
    /// Receive buffers are one byte larger than the packet limit, so a datagram the socket
    /// had to truncate shows up here as oversized instead of as a shorter payload.
    pub fn decode_within(bytes: &[u8], max_size: usize) -> Result<(PacketHeader, &[u8])> {
        if bytes.len() > max_size {
            return Err(ErrorKind::MalformedPacket(DecodingErrorKind::Oversized));
        }
        Self::decode(bytes)
    }
}
