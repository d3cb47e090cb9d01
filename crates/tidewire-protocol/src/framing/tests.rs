//! Encoder and decoder tests.

use tidewire_core::{
    error::{DecodingErrorKind, ErrorKind},
    BinaryStream,
};

use super::{FramingDecoder, FramingEncoder, PacketHeader};
use crate::channel::{ChannelKind, Operation, Target};

#[test]
fn test_unreliable_layout() {
    let header =
        PacketHeader::new(ChannelKind::Unreliable, Target::Others, Operation::Sequence, 0x0102);
    let bytes = FramingEncoder::encode_to_vec(&header, b"hi").unwrap();
    assert_eq!(bytes, vec![0, 2, 0, 0x02, 0x01, b'h', b'i']);

    let (decoded, payload) = FramingDecoder::decode(&bytes).unwrap();
    assert_eq!(decoded, header);
    assert_eq!(payload, b"hi");
}

#[test]
fn test_reliable_layout_carries_sequence() {
    let header = PacketHeader::new(ChannelKind::Reliable, Target::Server, Operation::Sequence, 1)
        .with_sequence(1);
    let bytes = FramingEncoder::encode_to_vec(&header, b"hello").unwrap();
    assert_eq!(&bytes[..9], &[1, 5, 0, 1, 0, 1, 0, 0, 0]);
    assert_eq!(bytes.len(), 9 + 5);

    let (decoded, payload) = FramingDecoder::decode(&bytes).unwrap();
    assert_eq!(decoded.sequence, Some(1));
    assert_eq!(payload, b"hello");
}

#[test]
fn test_acknowledgement_has_empty_payload() {
    let ack = Operation::Acknowledgement;
    let header =
        PacketHeader::new(ChannelKind::ReliableOrdered, Target::Single, ack, 0).with_sequence(42);
    let bytes = FramingEncoder::encode_to_vec(&header, &[]).unwrap();
    assert_eq!(bytes.len(), 9);

    let (decoded, payload) = FramingDecoder::decode(&bytes).unwrap();
    assert_eq!(decoded.operation, Operation::Acknowledgement);
    assert_eq!(decoded.sequence, Some(42));
    assert!(payload.is_empty());
}

#[test]
fn test_unreliable_ignores_sequence_on_encode() {
    let header = PacketHeader::new(ChannelKind::Unreliable, Target::All, Operation::Data, 3)
        .with_sequence(7);
    let bytes = FramingEncoder::encode_to_vec(&header, &[]).unwrap();
    assert_eq!(bytes.len(), 5);
    let (decoded, _) = FramingDecoder::decode(&bytes).unwrap();
    assert_eq!(decoded.sequence, None);
}

#[test]
fn test_reliable_without_sequence_is_rejected() {
    let header = PacketHeader::new(ChannelKind::Reliable, Target::All, Operation::Data, 3);
    assert!(matches!(
        FramingEncoder::encode_to_vec(&header, &[]),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::MissingSequence))
    ));
}

#[test]
fn test_truncated_header() {
    assert!(matches!(
        FramingDecoder::decode(&[0, 0, 0, 1]),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::Truncated))
    ));
    assert!(matches!(
        FramingDecoder::decode(&[1, 0, 0, 1, 0, 9, 9]),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::MissingSequence))
    ));
}

#[test]
fn test_unknown_enum_bytes() {
    assert!(matches!(
        FramingDecoder::decode(&[9, 0, 0, 0, 0]),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::Channel))
    ));
    assert!(matches!(
        FramingDecoder::decode(&[0, 9, 0, 0, 0]),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::Target))
    ));
    assert!(matches!(
        FramingDecoder::decode(&[0, 0, 9, 0, 0]),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::Operation))
    ));
}

#[test]
fn test_stream_encoding_matches_vec_encoding() {
    let mut stream = BinaryStream::with_capacity(32);
    let header =
        PacketHeader::new(ChannelKind::ReliableOrdered, Target::Single, Operation::Data, 7)
            .with_sequence(-5);
    FramingEncoder::encode_datagram(&mut stream, &header, &[0xAA, 0xBB]).unwrap();
    assert_eq!(stream.len(), 11);
    let owned = FramingEncoder::encode_to_vec(&header, &[0xAA, 0xBB]).unwrap();
    assert_eq!(stream.as_slice(), &owned[..]);

    let (decoded, payload) = FramingDecoder::decode(stream.as_slice()).unwrap();
    assert_eq!(decoded, header);
    assert_eq!(payload, &[0xAA, 0xBB]);
}

#[test]
fn test_datagram_over_limit_is_rejected() {
    let header = PacketHeader::new(ChannelKind::Unreliable, Target::Server, Operation::Sequence, 1);
    let bytes = FramingEncoder::encode_to_vec(&header, &[7; 20]).unwrap();

    assert!(FramingDecoder::decode_within(&bytes, 25).is_ok());
    assert!(matches!(
        FramingDecoder::decode_within(&bytes, 24),
        Err(ErrorKind::MalformedPacket(DecodingErrorKind::Oversized))
    ));
}

#[test]
fn test_datagram_larger_than_stream() {
    let mut stream = BinaryStream::with_capacity(8);
    let header = PacketHeader::new(ChannelKind::Unreliable, Target::All, Operation::Data, 0);
    assert!(matches!(
        FramingEncoder::encode_datagram(&mut stream, &header, &[0; 4]),
        Err(ErrorKind::CapacityExceeded { needed: 9, remaining: 8 })
    ));
}
