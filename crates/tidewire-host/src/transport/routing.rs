//! Destination resolution for outbound application messages.

use std::net::SocketAddr;

use tidewire_core::{constants::SERVER_PEER_ID, PeerId};
use tidewire_peer::PeerRegistry;
use tidewire_protocol::{Operation, Target};

use crate::message::Message;

/// Where one outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Route {
    /// Run the local handler on the send thread.
    pub(crate) local: bool,
    /// Remote destinations, each with its own sequence on reliable channels.
    pub(crate) remotes: Vec<(PeerId, SocketAddr)>,
    /// Peer id written in every header.
    pub(crate) header_peer_id: PeerId,
    /// Operation written in every header.
    pub(crate) operation: Operation,
}

/// Routes a message on the server.
///
/// Server-originated messages have no origin. Relayed ones carry the sending client as
/// origin, which is also the header peer id the recipients see.
pub(crate) fn server_route(registry: &PeerRegistry, message: &Message) -> Route {
    let origin = message.origin;
    let everyone = || registry.peers();
    let all_but_origin = || {
        registry.peers().into_iter().filter(|(id, _)| Some(*id) != origin).collect::<Vec<_>>()
    };

    let (local, remotes) = match message.target {
        Target::All => (origin.is_none(), everyone()),
        // The originator already ran its immediate delivery.
        Target::AllImmediately | Target::Others => (false, all_but_origin()),
        Target::Single | Target::SingleImmediately if message.peer_id == SERVER_PEER_ID => {
            (message.target == Target::Single && origin.is_none(), Vec::new())
        }
        Target::Single | Target::SingleImmediately => {
            let remotes = registry
                .address_of(message.peer_id)
                .map(|address| vec![(message.peer_id, address)])
                .unwrap_or_default();
            (false, remotes)
        }
        Target::Server => (origin.is_none(), Vec::new()),
    };

    Route { local, remotes, header_peer_id: message.originator(), operation: Operation::Data }
}

/// Routes a message on a connected client. Everything remote goes through the server.
pub(crate) fn client_route(server: SocketAddr, local_id: PeerId, message: &Message) -> Route {
    let to_self = message.target.is_single() && message.peer_id == local_id;
    if to_self {
        return Route {
            // An immediate self-send was already handled by the caller.
            local: message.target == Target::Single,
            remotes: Vec::new(),
            header_peer_id: local_id,
            operation: Operation::Sequence,
        };
    }

    let header_peer_id = if message.target.is_single() { message.peer_id } else { local_id };
    Route {
        local: false,
        remotes: vec![(SERVER_PEER_ID, server)],
        header_peer_id,
        operation: Operation::Sequence,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tidewire_core::shared::SharedBytes;
    use tidewire_protocol::ChannelKind;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn registry_with_clients(count: u16) -> PeerRegistry {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        for port in 1..=count {
            let id = registry.allocate().unwrap();
            registry.register(addr(port), id, u32::from(port), now);
        }
        registry
    }

    fn local(target: Target, peer_id: PeerId) -> Message {
        let payload = SharedBytes::empty();
        Message::outbound(payload, ChannelKind::Reliable, target, peer_id, Operation::Data)
    }

    fn relayed(target: Target, destination: PeerId, origin: PeerId) -> Message {
        Message::relay(SharedBytes::empty(), ChannelKind::Reliable, target, destination, origin)
    }

    fn ids(route: &Route) -> Vec<PeerId> {
        route.remotes.iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn test_server_all_reaches_everyone_and_itself() {
        let registry = registry_with_clients(3);
        let route = server_route(&registry, &local(Target::All, 0));
        assert!(route.local);
        assert_eq!(ids(&route), vec![1, 2, 3]);
        assert_eq!(route.header_peer_id, 0);
        assert_eq!(route.operation, Operation::Data);
    }

    #[test]
    fn test_relayed_all_includes_sender() {
        let registry = registry_with_clients(3);
        let route = server_route(&registry, &relayed(Target::All, 0, 2));
        assert!(!route.local);
        assert_eq!(ids(&route), vec![1, 2, 3]);
        assert_eq!(route.header_peer_id, 2);
    }

    #[test]
    fn test_relayed_others_excludes_sender() {
        let registry = registry_with_clients(3);
        let route = server_route(&registry, &relayed(Target::Others, 0, 2));
        assert_eq!(ids(&route), vec![1, 3]);

        let route = server_route(&registry, &relayed(Target::AllImmediately, 0, 1));
        assert_eq!(ids(&route), vec![2, 3]);
        assert!(!route.local);
    }

    #[test]
    fn test_server_others_skips_only_itself() {
        let registry = registry_with_clients(2);
        let route = server_route(&registry, &local(Target::Others, 0));
        assert!(!route.local);
        assert_eq!(ids(&route), vec![1, 2]);
    }

    #[test]
    fn test_single_routes() {
        let registry = registry_with_clients(2);

        let route = server_route(&registry, &local(Target::Single, 2));
        assert_eq!(route.remotes, vec![(2, addr(2))]);
        assert!(!route.local);

        let route = server_route(&registry, &local(Target::Single, 0));
        assert!(route.local);
        assert!(route.remotes.is_empty());

        // Unknown destinations resolve to nothing.
        let route = server_route(&registry, &relayed(Target::Single, 9, 1));
        assert!(route.remotes.is_empty());
        assert!(!route.local);
    }

    #[test]
    fn test_server_target() {
        let registry = registry_with_clients(2);
        let route = server_route(&registry, &local(Target::Server, 0));
        assert!(route.local);
        assert!(route.remotes.is_empty());
    }

    #[test]
    fn test_client_routes_through_server() {
        let server = addr(5055);

        let route = client_route(server, 4, &local(Target::All, 0));
        assert_eq!(route.remotes, vec![(0, server)]);
        assert_eq!(route.header_peer_id, 4);
        assert_eq!(route.operation, Operation::Sequence);

        let route = client_route(server, 4, &local(Target::Single, 7));
        assert_eq!(route.remotes, vec![(0, server)]);
        assert_eq!(route.header_peer_id, 7);

        let route = client_route(server, 4, &local(Target::Single, 4));
        assert!(route.local);
        assert!(route.remotes.is_empty());

        let route = client_route(server, 4, &local(Target::SingleImmediately, 4));
        assert!(!route.local);
        assert!(route.remotes.is_empty());
    }
}
