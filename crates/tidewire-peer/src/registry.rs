//! Peer bookkeeping shared by the receive loop, the send loop and caller threads.
//!
//! Bindings (address to id, id to record, free ids) sit behind one `RwLock` that only changes
//! on connect and disconnect. Per-datagram state (liveness, traffic counters and channel
//! states) lives in sharded maps so traffic for unrelated peers does not contend. When both
//! are needed the bindings lock is always taken first.

use std::{
    collections::{BTreeSet, HashMap},
    net::SocketAddr,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use tidewire_core::{constants::SERVER_PEER_ID, sharded::ShardedMap, PeerId};
use tidewire_protocol::ChannelKind;
use tracing::debug;

use crate::{channel_state::ChannelState, statistics::PeerStatistics};

/// Identifies the channel state of one peer and channel kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Remote peer, or 0 for the server on a client.
    pub peer_id: PeerId,
    /// Channel kind.
    pub kind: ChannelKind,
}

impl ChannelKey {
    /// Creates a key.
    pub fn new(peer_id: PeerId, kind: ChannelKind) -> Self {
        Self { peer_id, kind }
    }
}

/// Binding of a registered peer.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    /// Assigned id.
    pub id: PeerId,
    /// Remote address.
    pub address: SocketAddr,
    /// Token of the handshake that created the binding.
    pub session_token: u32,
}

#[derive(Debug)]
struct PeerLink {
    last_heard: Instant,
    statistics: PeerStatistics,
}

struct Bindings {
    by_address: HashMap<SocketAddr, PeerId>,
    by_id: HashMap<PeerId, PeerRecord>,
    free_ids: BTreeSet<PeerId>,
    highest_id: PeerId,
}

/// Registry of connected peers and their channel states.
pub struct PeerRegistry {
    bindings: RwLock<Bindings>,
    links: ShardedMap<PeerId, PeerLink>,
    channels: ShardedMap<ChannelKey, ChannelState>,
    reorder_limit: usize,
}

impl PeerRegistry {
    /// Creates a registry with every non-zero id free.
    pub fn new(shards: usize, reorder_limit: usize) -> Self {
        Self::bounded(shards, reorder_limit, usize::from(PeerId::MAX))
    }

    /// Creates a registry that hands out ids `1..=max_peers` only.
    pub fn bounded(shards: usize, reorder_limit: usize, max_peers: usize) -> Self {
        let highest_id = PeerId::try_from(max_peers).unwrap_or(PeerId::MAX);
        let bindings = Bindings {
            by_address: HashMap::new(),
            by_id: HashMap::new(),
            free_ids: (SERVER_PEER_ID + 1..=highest_id).collect(),
            highest_id,
        };
        Self {
            bindings: RwLock::new(bindings),
            links: ShardedMap::new(shards),
            channels: ShardedMap::new(shards),
            reorder_limit,
        }
    }

    /// Takes the lowest free id out of the pool.
    pub fn allocate(&self) -> Option<PeerId> {
        self.bindings.write().free_ids.pop_first()
    }

    /// Binds `address` to `id` and creates its channel states.
    ///
    /// A different id previously bound to `address` is torn down first and returned.
    pub fn register(
        &self,
        address: SocketAddr,
        id: PeerId,
        session_token: u32,
        now: Instant,
    ) -> Option<PeerId> {
        let mut bindings = self.bindings.write();

        let displaced = match bindings.by_address.get(&address).copied() {
            Some(previous) if previous != id => {
                self.teardown(&mut bindings, previous);
                Some(previous)
            }
            _ => None,
        };

        if let Some(stale) = bindings.by_id.get(&id).map(|record| record.address) {
            if stale != address {
                bindings.by_address.remove(&stale);
            }
        }

        bindings.free_ids.remove(&id);
        bindings.by_address.insert(address, id);
        bindings.by_id.insert(id, PeerRecord { id, address, session_token });
        self.links.insert(id, PeerLink { last_heard: now, statistics: PeerStatistics::default() });
        for kind in ChannelKind::ALL {
            let state = ChannelState::new(kind, self.reorder_limit);
            self.channels.insert(ChannelKey::new(id, kind), state);
        }

        debug!("registered peer {} at {} (token {:#010x})", id, address, session_token);
        displaced
    }

    /// Removes a peer, its channel states and returns its id to the pool.
    pub fn unregister(&self, id: PeerId) -> Option<PeerRecord> {
        let mut bindings = self.bindings.write();
        self.teardown(&mut bindings, id)
    }

    fn teardown(&self, bindings: &mut Bindings, id: PeerId) -> Option<PeerRecord> {
        let record = bindings.by_id.remove(&id)?;
        if bindings.by_address.get(&record.address) == Some(&id) {
            bindings.by_address.remove(&record.address);
        }
        self.links.remove(&id);
        for kind in ChannelKind::ALL {
            self.channels.remove(&ChannelKey::new(id, kind));
        }
        if id != SERVER_PEER_ID && id <= bindings.highest_id {
            bindings.free_ids.insert(id);
        }
        debug!("unregistered peer {} at {}", id, record.address);
        Some(record)
    }

    /// Removes every peer.
    pub fn clear(&self) -> Vec<PeerRecord> {
        let mut bindings = self.bindings.write();
        let ids: Vec<PeerId> = bindings.by_id.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.teardown(&mut bindings, id)).collect()
    }

    /// Id bound to `address`.
    pub fn lookup(&self, address: &SocketAddr) -> Option<PeerId> {
        self.bindings.read().by_address.get(address).copied()
    }

    /// Address bound to `id`.
    pub fn address_of(&self, id: PeerId) -> Option<SocketAddr> {
        self.bindings.read().by_id.get(&id).map(|record| record.address)
    }

    /// Session token of the handshake that registered `id`.
    pub fn session_token(&self, id: PeerId) -> Option<u32> {
        self.bindings.read().by_id.get(&id).map(|record| record.session_token)
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: PeerId) -> bool {
        self.bindings.read().by_id.contains_key(&id)
    }

    /// Marks `id` as heard from at `now`. Returns false if `id` is not registered.
    pub fn touch(&self, id: PeerId, now: Instant) -> bool {
        self.links.with_mut(&id, |link| link.last_heard = now).is_some()
    }

    /// Registered peers ordered by id.
    pub fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        let bindings = self.bindings.read();
        let mut peers: Vec<_> =
            bindings.by_id.values().map(|record| (record.id, record.address)).collect();
        peers.sort_unstable_by_key(|(id, _)| *id);
        peers
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.bindings.read().by_id.len()
    }

    /// Number of ids left in the pool.
    pub fn available_ids(&self) -> usize {
        self.bindings.read().free_ids.len()
    }

    /// Peers that have been silent for at least `timeout`.
    pub fn idle_peers(&self, now: Instant, timeout: Duration) -> Vec<PeerId> {
        let mut idle = Vec::new();
        self.links.for_each(|id, link| {
            if now.saturating_duration_since(link.last_heard) >= timeout {
                idle.push(*id);
            }
        });
        idle.sort_unstable();
        idle
    }

    /// Runs `f` on the channel state of `peer_id`, if the peer is registered.
    pub fn with_channel<R>(
        &self,
        peer_id: PeerId,
        kind: ChannelKind,
        f: impl FnOnce(&mut ChannelState) -> R,
    ) -> Option<R> {
        self.channels.with_mut(&ChannelKey::new(peer_id, kind), f)
    }

    fn with_statistics(&self, id: PeerId, f: impl FnOnce(&mut PeerStatistics)) {
        self.links.with_mut(&id, |link| f(&mut link.statistics));
    }

    /// Counts a datagram sent to `id`.
    pub fn record_sent(&self, id: PeerId, bytes: usize) {
        self.with_statistics(id, |stats| {
            stats.packets_sent += 1;
            stats.bytes_sent += bytes as u64;
        });
    }

    /// Counts a retransmission to `id`.
    pub fn record_retransmission(&self, id: PeerId) {
        self.with_statistics(id, |stats| stats.retransmissions += 1);
    }

    /// Counts an abandoned delivery to `id`.
    pub fn record_lost(&self, id: PeerId) {
        self.with_statistics(id, |stats| stats.packets_lost += 1);
    }

    /// Counts a datagram received from `id`.
    pub fn record_received(&self, id: PeerId, bytes: usize) {
        self.with_statistics(id, |stats| {
            stats.packets_received += 1;
            stats.bytes_received += bytes as u64;
        });
    }

    /// Traffic counters of `id`.
    pub fn statistics(&self, id: PeerId) -> Option<PeerStatistics> {
        self.links.with(&id, |link| link.statistics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_allocate_lowest_free() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        assert_eq!(registry.allocate(), Some(1));
        assert_eq!(registry.allocate(), Some(2));
        registry.register(addr(1000), 1, 7, now);
        registry.unregister(1);
        assert_eq!(registry.allocate(), Some(1));
        assert_eq!(registry.available_ids(), 65535 - 2);
    }

    #[test]
    fn test_bounded_pool() {
        let registry = PeerRegistry::bounded(4, 16, 2);
        let now = Instant::now();
        assert_eq!(registry.available_ids(), 2);
        assert_eq!(registry.allocate(), Some(1));
        assert_eq!(registry.allocate(), Some(2));
        assert_eq!(registry.allocate(), None);

        registry.register(addr(1000), 2, 7, now);
        registry.unregister(2);
        assert_eq!(registry.allocate(), Some(2));

        // Ids outside the pool can be registered but never return to it.
        registry.register(addr(1001), 40, 7, now);
        registry.unregister(40);
        assert_eq!(registry.available_ids(), 0);
    }

    #[test]
    fn test_register_creates_channels() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        let id = registry.allocate().unwrap();
        assert!(registry.register(addr(1000), id, 7, now).is_none());

        assert_eq!(registry.lookup(&addr(1000)), Some(id));
        assert_eq!(registry.address_of(id), Some(addr(1000)));
        assert_eq!(registry.session_token(id), Some(7));
        for kind in ChannelKind::ALL {
            assert_eq!(registry.with_channel(id, kind, |state| state.kind()), Some(kind));
        }
    }

    #[test]
    fn test_register_displaces_previous_binding() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        let first = registry.allocate().unwrap();
        registry.register(addr(1000), first, 7, now);
        registry.with_channel(first, ChannelKind::Reliable, |state| state.next_sequence());

        let second = registry.allocate().unwrap();
        assert_eq!(registry.register(addr(1000), second, 8, now), Some(first));
        assert_eq!(second, 2);
        assert!(!registry.contains(first));
        assert!(registry.with_channel(first, ChannelKind::Reliable, |_| ()).is_none());
        assert_eq!(registry.lookup(&addr(1000)), Some(second));
        assert_eq!(registry.peer_count(), 1);

        // The displaced id went back to the pool.
        assert_eq!(registry.allocate(), Some(first));
    }

    #[test]
    fn test_unregister_releases_id() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        let id = registry.allocate().unwrap();
        registry.register(addr(1000), id, 1, now);

        let record = registry.unregister(id).unwrap();
        assert_eq!(record.address, addr(1000));
        assert!(registry.lookup(&addr(1000)).is_none());
        assert!(registry.unregister(id).is_none());
        assert_eq!(registry.allocate(), Some(id));
    }

    #[test]
    fn test_server_id_is_never_pooled() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        registry.register(addr(5055), SERVER_PEER_ID, 1, now);
        assert!(registry.contains(SERVER_PEER_ID));
        registry.unregister(SERVER_PEER_ID);
        assert_eq!(registry.available_ids(), 65535);
        assert_eq!(registry.allocate(), Some(1));
    }

    #[test]
    fn test_idle_peers_and_touch() {
        let registry = PeerRegistry::new(4, 16);
        let start = Instant::now();
        registry.register(addr(1), 1, 0, start);
        registry.register(addr(2), 2, 0, start);
        registry.touch(2, start + Duration::from_secs(5));

        let idle = registry.idle_peers(start + Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(idle, vec![1]);
        assert!(!registry.touch(9, start));
    }

    #[test]
    fn test_statistics_accumulate() {
        let registry = PeerRegistry::new(4, 16);
        registry.register(addr(1), 1, 0, Instant::now());
        registry.record_sent(1, 10);
        registry.record_sent(1, 5);
        registry.record_received(1, 7);
        registry.record_retransmission(1);
        registry.record_lost(1);

        let stats = registry.statistics(1).unwrap();
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.retransmissions, 1);
        assert_eq!(stats.packets_lost, 1);
        assert!(registry.statistics(2).is_none());

        // Counters belong to the binding, not the id.
        registry.unregister(1);
        registry.record_sent(1, 10);
        assert!(registry.statistics(1).is_none());
        registry.register(addr(1), 1, 0, Instant::now());
        assert_eq!(registry.statistics(1), Some(PeerStatistics::default()));
    }

    #[test]
    fn test_concurrent_counters_per_peer() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        for id in 1..=4 {
            registry.register(addr(id), id, 0, now);
        }
        std::thread::scope(|scope| {
            for id in 1..=4 {
                let registry = &registry;
                scope.spawn(move || {
                    for _ in 0..1000 {
                        registry.touch(id, now);
                        registry.record_received(id, 3);
                    }
                });
            }
        });
        for id in 1..=4 {
            let stats = registry.statistics(id).unwrap();
            assert_eq!(stats.packets_received, 1000);
            assert_eq!(stats.bytes_received, 3000);
        }
    }

    #[test]
    fn test_clear_removes_all() {
        let registry = PeerRegistry::new(4, 16);
        let now = Instant::now();
        registry.register(addr(1), 1, 0, now);
        registry.register(addr(2), 2, 0, now);
        assert_eq!(registry.clear().len(), 2);
        assert_eq!(registry.peer_count(), 0);
        assert!(registry.peers().is_empty());
    }
}
