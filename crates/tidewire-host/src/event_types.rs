//! Events reported to the application.
//!
//! Transport activity that is not a message delivery (connection changes, failed
//! or dropped deliveries) is pushed through the receiver returned by `Transport::events`.

use std::net::SocketAddr;

use tidewire_core::PeerId;
use tidewire_protocol::{ChannelKind, Target};

/// Why a peer binding went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer said goodbye, or the local side disconnected it.
    Requested,
    /// The same address completed a new handshake with a different session token.
    Replaced,
    /// Nothing was heard from the peer for longer than the idle timeout.
    TimedOut,
}

/// Events emitted by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Client: the handshake completed and the server assigned this id.
    Connected {
        /// Id assigned by the server.
        peer_id: PeerId,
    },
    /// Server: a client completed its handshake.
    PeerConnected {
        /// Id assigned to the client.
        peer_id: PeerId,
        /// Client address.
        address: SocketAddr,
    },
    /// Server: a client binding was torn down.
    PeerDisconnected {
        /// Id the client had.
        peer_id: PeerId,
        /// Client address.
        address: SocketAddr,
        /// Why the binding ended.
        reason: DisconnectReason,
    },
    /// Client: the server disconnected us, or the transport was closed while connected.
    Disconnected,
    /// A reliable message ran out of retries without being acknowledged.
    DeliveryAbandoned {
        /// Destination peer (0 for the server).
        peer_id: PeerId,
        /// Sequence of the abandoned datagram.
        sequence: i32,
        /// Channel it was sent on.
        channel: ChannelKind,
    },
    /// A reliable message was discarded before it was sent because a send queue was full.
    ///
    /// It never got a sequence, so it cannot be matched to a later `DeliveryAbandoned`.
    DeliveryDropped {
        /// Peer id the message was addressed with.
        peer_id: PeerId,
        /// Routing target of the message.
        target: Target,
        /// Channel it would have been sent on.
        channel: ChannelKind,
    },
    /// Client: no handshake reply arrived within the handshake timeout. Retrying continues.
    HandshakeTimedOut {
        /// Server address being contacted.
        server: SocketAddr,
    },
}
