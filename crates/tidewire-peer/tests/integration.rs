//! Integration tests for the tidewire-peer crate.
//!
//! These drive the registry and channel states the way the transport does: every arrival is
//! routed through `PeerRegistry::with_channel` and delivered payloads are collected in order.

use std::{net::SocketAddr, time::Instant};

use tidewire_peer::{Arrival, PeerRegistry};
use tidewire_protocol::ChannelKind;

fn get_fake_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn registry_with_peer() -> (PeerRegistry, u16) {
    let registry = PeerRegistry::new(8, 64);
    let id = registry.allocate().unwrap();
    registry.register(get_fake_addr(4000), id, 0xABCD, Instant::now());
    (registry, id)
}

/// Feeds one arrival and returns what the application would see, plus whether an
/// acknowledgement goes back.
fn arrive(
    registry: &PeerRegistry,
    peer: u16,
    kind: ChannelKind,
    sequence: i32,
    payload: &[u8],
) -> (Vec<Vec<u8>>, bool) {
    let arrival =
        registry.with_channel(peer, kind, |state| state.receive(sequence, payload)).unwrap();
    let acknowledge = arrival.should_acknowledge();
    let delivered = match arrival {
        Arrival::Deliver { followers } => {
            let mut all = vec![payload.to_vec()];
            all.extend(followers);
            all
        }
        _ => Vec::new(),
    };
    (delivered, acknowledge)
}

#[test]
fn test_ordered_arrivals_delivered_in_sequence_once() {
    let (registry, peer) = registry_with_peer();
    let mut delivered = Vec::new();
    let mut acks = 0;

    for sequence in [1, 3, 2, 4] {
        let payload = [sequence as u8];
        let (out, ack) = arrive(&registry, peer, ChannelKind::ReliableOrdered, sequence, &payload);
        delivered.extend(out);
        acks += usize::from(ack);
    }

    assert_eq!(delivered, vec![vec![1], vec![2], vec![3], vec![4]]);
    assert_eq!(acks, 4);

    // Retransmissions of anything already delivered are acknowledged but not delivered again.
    for sequence in [1, 2, 3, 4] {
        let (out, ack) = arrive(&registry, peer, ChannelKind::ReliableOrdered, sequence, &[0]);
        assert!(out.is_empty());
        assert!(ack);
    }
}

#[test]
fn test_reliable_duplicate_delivered_once_acked_twice() {
    let (registry, peer) = registry_with_peer();

    let (first, first_ack) = arrive(&registry, peer, ChannelKind::Reliable, 1, b"hello");
    let (second, second_ack) = arrive(&registry, peer, ChannelKind::Reliable, 1, b"hello");

    assert_eq!(first, vec![b"hello".to_vec()]);
    assert!(second.is_empty());
    assert!(first_ack && second_ack);
}

#[test]
fn test_stale_ordered_sequence_leaves_buffer_untouched() {
    let (registry, peer) = registry_with_peer();

    arrive(&registry, peer, ChannelKind::ReliableOrdered, 1, b"a");
    arrive(&registry, peer, ChannelKind::ReliableOrdered, 2, b"b");
    arrive(&registry, peer, ChannelKind::ReliableOrdered, 5, b"e");

    let before = registry
        .with_channel(peer, ChannelKind::ReliableOrdered, |state| {
            (state.buffered_len(), state.last_processed_seq(), state.last_received_seq())
        })
        .unwrap();
    assert_eq!(before, (1, 2, 5));

    let (out, _) = arrive(&registry, peer, ChannelKind::ReliableOrdered, 1, b"stale");
    assert!(out.is_empty());

    let after = registry
        .with_channel(peer, ChannelKind::ReliableOrdered, |state| {
            (state.buffered_len(), state.last_processed_seq(), state.last_received_seq())
        })
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_channels_are_independent() {
    let (registry, peer) = registry_with_peer();

    arrive(&registry, peer, ChannelKind::ReliableOrdered, 2, b"wait");
    let (out, _) = arrive(&registry, peer, ChannelKind::Reliable, 2, b"now");
    assert_eq!(out, vec![b"now".to_vec()]);

    let (out, _) = arrive(&registry, peer, ChannelKind::Unreliable, 0, b"any");
    assert_eq!(out, vec![b"any".to_vec()]);
}

#[test]
fn test_peers_have_independent_sequences() {
    let registry = PeerRegistry::new(8, 64);
    let now = Instant::now();
    let a = registry.allocate().unwrap();
    registry.register(get_fake_addr(1), a, 1, now);
    let b = registry.allocate().unwrap();
    registry.register(get_fake_addr(2), b, 2, now);

    let next = |peer| registry.with_channel(peer, ChannelKind::Reliable, |s| s.next_sequence());
    assert_eq!(next(a), Some(1));
    assert_eq!(next(a), Some(2));
    assert_eq!(next(b), Some(1));
}

#[test]
fn test_reconnect_with_new_session_gets_fresh_state() {
    let registry = PeerRegistry::new(8, 64);
    let now = Instant::now();
    let address = get_fake_addr(4000);

    let first = registry.allocate().unwrap();
    registry.register(address, first, 1, now);
    arrive(&registry, first, ChannelKind::ReliableOrdered, 1, b"old");

    // Same address, new token: allocate first, then register tears the old binding down.
    let second = registry.allocate().unwrap();
    let displaced = registry.register(address, second, 2, now);
    assert_eq!(displaced, Some(first));
    assert_eq!(second, 2);

    let expected =
        registry.with_channel(second, ChannelKind::ReliableOrdered, |s| s.expected_seq());
    assert_eq!(expected, Some(1));
    assert_eq!(registry.session_token(second), Some(2));
}
