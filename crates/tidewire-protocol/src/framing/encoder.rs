//! Datagram encoding.

use tidewire_core::{
    error::{DecodingErrorKind, ErrorKind, Result},
    BinaryStream,
};

use super::PacketHeader;

/// Serializes headers and datagrams.
pub struct FramingEncoder;

impl FramingEncoder {
    /// Writes `header` at the stream cursor.
    ///
    /// Reliable headers must carry a sequence; unreliable headers never write one.
    pub fn encode_header(stream: &mut BinaryStream, header: &PacketHeader) -> Result<()> {
        let remaining = stream.remaining_capacity();
        if header.size() > remaining {
            return Err(ErrorKind::CapacityExceeded { needed: header.size(), remaining });
        }

        let sequence = match (header.channel.is_reliable(), header.sequence) {
            (true, Some(sequence)) => Some(sequence),
            (true, None) => {
                return Err(ErrorKind::MalformedPacket(DecodingErrorKind::MissingSequence));
            }
            (false, _) => None,
        };

        stream.write_u8(header.channel.to_u8())?;
        stream.write_u8(header.target.to_u8())?;
        stream.write_u8(header.operation.to_u8())?;
        stream.write_u16(header.peer_id)?;
        if let Some(sequence) = sequence {
            stream.write_i32(sequence)?;
        }
        Ok(())
    }

    /// Clears `stream` and writes a complete datagram into it.
    pub fn encode_datagram(
        stream: &mut BinaryStream,
        header: &PacketHeader,
        payload: &[u8],
    ) -> Result<()> {
        let needed = header.size() + payload.len();
        if needed > stream.capacity() {
            return Err(ErrorKind::CapacityExceeded { needed, remaining: stream.capacity() });
        }
        stream.clear();
        Self::encode_header(stream, header)?;
        stream.write_bytes(payload)
    }

    /// Encodes a complete datagram into a new buffer.
    pub fn encode_to_vec(header: &PacketHeader, payload: &[u8]) -> Result<Vec<u8>> {
        let mut stream = BinaryStream::with_capacity(header.size() + payload.len());
        Self::encode_header(&mut stream, header)?;
        stream.write_bytes(payload)?;
        Ok(stream.as_slice().to_vec())
    }
}
