use std::{io, result};

use thiserror::Error;

use crate::PeerId;

/// Convenience alias used across the workspace.
pub type Result<T> = result::Result<T, ErrorKind>;

/// Everything that can go wrong inside tidewire.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A write would overflow the fixed buffer. The write is not applied.
    #[error("write of {needed} bytes exceeds the remaining capacity of {remaining} bytes")]
    CapacityExceeded {
        /// Bytes the write needed.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// A read went past the logical written length.
    #[error("read past the end of the stream")]
    EndOfStream,
    /// The stream content cannot be decoded (over-long varint, invalid text, negative length).
    #[error("stream content is corrupt")]
    CorruptStream,
    /// A datagram header could not be decoded.
    #[error("malformed packet: {0}")]
    MalformedPacket(DecodingErrorKind),
    /// The peer id pool is exhausted.
    #[error("no peer ids available")]
    NoAvailableIds,
    /// A reliable message exhausted its retry budget.
    #[error("delivery of sequence {sequence} to peer {peer_id} was abandoned")]
    DeliveryAbandoned {
        /// Destination peer.
        peer_id: PeerId,
        /// Sequence of the abandoned message.
        sequence: i32,
    },
    /// A resource was used after it was released.
    #[error("resource used after it was disposed")]
    AlreadyDisposed,
    /// No remote-call handler is registered for the id.
    #[error("no handler registered for id {0}")]
    UnknownHandler(u32),
    /// Wrapper around a std io error.
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

/// Which part of a datagram header failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    /// Unknown channel kind byte.
    Channel,
    /// Unknown target byte.
    Target,
    /// Unknown operation byte.
    Operation,
    /// The datagram is shorter than its header.
    Truncated,
    /// A reliable channel header is missing its sequence.
    MissingSequence,
    /// The datagram is larger than the configured maximum packet size.
    Oversized,
}

impl std::fmt::Display for DecodingErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodingErrorKind::Channel => write!(f, "unknown channel kind"),
            DecodingErrorKind::Target => write!(f, "unknown target"),
            DecodingErrorKind::Operation => write!(f, "unknown operation"),
            DecodingErrorKind::Truncated => write!(f, "truncated header"),
            DecodingErrorKind::MissingSequence => write!(f, "missing sequence"),
            DecodingErrorKind::Oversized => write!(f, "datagram exceeds the maximum packet size"),
        }
    }
}
