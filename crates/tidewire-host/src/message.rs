//! Outbound work items.

use std::net::SocketAddr;

use tidewire_core::{constants::SERVER_PEER_ID, shared::SharedBytes, PeerId};
use tidewire_protocol::{ChannelKind, Operation, Target};

/// One unit of outbound work for the send loop.
///
/// A message with an `address` is a control datagram (acknowledgement, handshake, disconnect)
/// sent as-is. Without one it is application traffic: the send loop resolves its destinations
/// from `target`, `peer_id` and `origin`, and assigns a sequence per destination on reliable
/// channels.
#[derive(Clone, Debug)]
pub struct Message {
    /// Channel to send on.
    pub channel: ChannelKind,
    /// Addressing mode.
    pub target: Target,
    /// Operation written in the header.
    pub operation: Operation,
    /// Destination for single targets; header peer id for control datagrams.
    pub peer_id: PeerId,
    /// Client that sent the message when the server relays it.
    pub origin: Option<PeerId>,
    /// Fixed sequence, only used by control datagrams.
    pub sequence: Option<i32>,
    /// Fixed destination address, only used by control datagrams.
    pub address: Option<SocketAddr>,
    /// Application payload, shared between every copy of the message.
    pub payload: SharedBytes,
}

impl Message {
    /// Application traffic originated locally.
    pub fn outbound(
        payload: SharedBytes,
        channel: ChannelKind,
        target: Target,
        peer_id: PeerId,
        operation: Operation,
    ) -> Self {
        Self {
            channel,
            target,
            operation,
            peer_id,
            origin: None,
            sequence: None,
            address: None,
            payload,
        }
    }

    /// Client traffic the server forwards to other peers.
    pub fn relay(
        payload: SharedBytes,
        channel: ChannelKind,
        target: Target,
        destination: PeerId,
        origin: PeerId,
    ) -> Self {
        Self {
            origin: Some(origin),
            ..Self::outbound(payload, channel, target, destination, Operation::Data)
        }
    }

    /// Acknowledgement of `sequence` back to `address`.
    pub fn acknowledgement(
        address: SocketAddr,
        channel: ChannelKind,
        local_id: PeerId,
        sequence: i32,
    ) -> Self {
        Self {
            channel,
            target: Target::Single,
            operation: Operation::Acknowledgement,
            peer_id: local_id,
            origin: None,
            sequence: Some(sequence),
            address: Some(address),
            payload: SharedBytes::empty(),
        }
    }

    /// Unreliable control datagram to `address`.
    pub fn control(
        address: SocketAddr,
        operation: Operation,
        peer_id: PeerId,
        payload: SharedBytes,
    ) -> Self {
        Self {
            channel: ChannelKind::Unreliable,
            target: Target::Single,
            operation,
            peer_id,
            origin: None,
            sequence: None,
            address: Some(address),
            payload,
        }
    }

    /// Notice to `address` that the binding is over.
    pub fn disconnect(address: SocketAddr, peer_id: PeerId) -> Self {
        Self::control(address, Operation::Disconnect, peer_id, SharedBytes::empty())
    }

    /// Returns true for control datagrams with a fixed destination.
    pub fn is_control(&self) -> bool {
        self.address.is_some()
    }

    /// Peer id written in the header of relayed copies.
    pub fn originator(&self) -> PeerId {
        self.origin.unwrap_or(SERVER_PEER_ID)
    }
}
