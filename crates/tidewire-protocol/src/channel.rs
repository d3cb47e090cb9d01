//! Wire enums carried in every datagram header.
//!
//! The numeric values are part of the protocol and must never be reordered.

use std::convert::TryFrom;

use tidewire_core::error::{DecodingErrorKind, ErrorKind};

/// Delivery guarantee of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    /// Fire and forget. No sequence, no acknowledgement.
    Unreliable = 0,
    /// Acknowledged and retried, delivered once in arrival order.
    Reliable = 1,
    /// Acknowledged and retried, delivered once in send order.
    ReliableOrdered = 2,
}

impl ChannelKind {
    /// Every channel kind, in wire order.
    pub const ALL: [ChannelKind; 3] =
        [ChannelKind::Unreliable, ChannelKind::Reliable, ChannelKind::ReliableOrdered];

    /// Returns the wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for channels whose header carries a sequence.
    pub fn is_reliable(self) -> bool {
        !matches!(self, ChannelKind::Unreliable)
    }

    /// Size of the header for datagrams on this channel.
    pub fn header_size(self) -> usize {
        if self.is_reliable() {
            tidewire_core::constants::SEQUENCED_HEADER_SIZE
        } else {
            tidewire_core::constants::HEADER_SIZE
        }
    }
}

impl TryFrom<u8> for ChannelKind {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChannelKind::Unreliable),
            1 => Ok(ChannelKind::Reliable),
            2 => Ok(ChannelKind::ReliableOrdered),
            _ => Err(ErrorKind::MalformedPacket(DecodingErrorKind::Channel)),
        }
    }
}

/// Who a message is addressed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every peer, the originator included.
    All = 0,
    /// Every peer; the originator runs its handler on the calling thread.
    AllImmediately = 1,
    /// Every peer except the originator.
    Others = 2,
    /// One peer.
    Single = 3,
    /// One peer; a local destination runs its handler on the calling thread.
    SingleImmediately = 4,
    /// The server only.
    Server = 5,
}

impl Target {
    /// Returns the wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Returns true for the two single-peer targets.
    pub fn is_single(self) -> bool {
        matches!(self, Target::Single | Target::SingleImmediately)
    }

    /// Returns true when a local destination is handled on the caller thread.
    pub fn is_immediate(self) -> bool {
        matches!(self, Target::AllImmediately | Target::SingleImmediately)
    }
}

impl TryFrom<u8> for Target {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Target::All),
            1 => Ok(Target::AllImmediately),
            2 => Ok(Target::Others),
            3 => Ok(Target::Single),
            4 => Ok(Target::SingleImmediately),
            5 => Ok(Target::Server),
            _ => Err(ErrorKind::MalformedPacket(DecodingErrorKind::Target)),
        }
    }
}

/// What a datagram does.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Application data originated by a client.
    Sequence = 0,
    /// Application data relayed or originated by the server.
    Data = 1,
    /// Acknowledges a reliable sequence. Empty payload.
    Acknowledgement = 2,
    /// Handshake request or reply; doubles as keep-alive ping.
    ConnectAndPing = 3,
    /// Best-effort notice that the sender is leaving or dropping the receiver.
    Disconnect = 4,
}

impl Operation {
    /// Returns the wire value.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = ErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Sequence),
            1 => Ok(Operation::Data),
            2 => Ok(Operation::Acknowledgement),
            3 => Ok(Operation::ConnectAndPing),
            4 => Ok(Operation::Disconnect),
            _ => Err(ErrorKind::MalformedPacket(DecodingErrorKind::Operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_wire_values() {
        for kind in ChannelKind::ALL {
            assert_eq!(ChannelKind::try_from(kind.to_u8()).unwrap(), kind);
        }
        assert_eq!(ChannelKind::ReliableOrdered.to_u8(), 2);
        assert!(matches!(
            ChannelKind::try_from(3),
            Err(ErrorKind::MalformedPacket(DecodingErrorKind::Channel))
        ));
    }

    #[test]
    fn test_channel_header_sizes() {
        assert_eq!(ChannelKind::Unreliable.header_size(), 5);
        assert_eq!(ChannelKind::Reliable.header_size(), 9);
        assert_eq!(ChannelKind::ReliableOrdered.header_size(), 9);
    }

    #[test]
    fn test_target_wire_values() {
        assert_eq!(Target::try_from(0).unwrap(), Target::All);
        assert_eq!(Target::try_from(5).unwrap(), Target::Server);
        assert!(Target::SingleImmediately.is_single());
        assert!(Target::SingleImmediately.is_immediate());
        assert!(!Target::Others.is_immediate());
        assert!(matches!(
            Target::try_from(6),
            Err(ErrorKind::MalformedPacket(DecodingErrorKind::Target))
        ));
    }

    #[test]
    fn test_operation_wire_values() {
        assert_eq!(Operation::try_from(2).unwrap(), Operation::Acknowledgement);
        assert_eq!(Operation::Disconnect.to_u8(), 4);
        assert!(matches!(
            Operation::try_from(200),
            Err(ErrorKind::MalformedPacket(DecodingErrorKind::Operation))
        ));
    }
}
