//! Bookkeeping for reliable datagrams awaiting acknowledgement.
//!
//! Every reliable transmission, whether originated locally or relayed, is tracked per
//! destination so that retries resend the exact bytes that went out the first time.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use tidewire_core::{sharded::ShardedMap, shared::SharedBytes, PeerId};

use crate::channel::ChannelKind;

/// Key of an in-flight datagram: its sequence and destination.
pub type DeliveryKey = (i32, PeerId);

/// A reliable datagram that has not been acknowledged yet.
#[derive(Clone, Debug)]
pub struct RelayEntry {
    /// Sequence carried in the header.
    pub sequence: i32,
    /// Destination peer.
    pub peer_id: PeerId,
    /// Destination address.
    pub address: SocketAddr,
    /// Channel the datagram was sent on.
    pub channel: ChannelKind,
    /// Encoded datagram, header included.
    pub datagram: SharedBytes,
    /// Transmissions so far, the first one included.
    pub attempts: u32,
    /// Time of the first transmission.
    pub first_sent: Instant,
    /// Time of the latest transmission.
    pub last_sent: Instant,
}

impl RelayEntry {
    /// Creates an entry for a datagram that was just transmitted for the first time.
    pub fn new(
        sequence: i32,
        peer_id: PeerId,
        address: SocketAddr,
        channel: ChannelKind,
        datagram: SharedBytes,
        now: Instant,
    ) -> Self {
        Self {
            sequence,
            peer_id,
            address,
            channel,
            datagram,
            attempts: 1,
            first_sent: now,
            last_sent: now,
        }
    }

    /// Identifies the entry.
    pub fn key(&self) -> DeliveryKey {
        (self.sequence, self.peer_id)
    }

    /// True when the resend timer has elapsed.
    pub fn is_due(&self, now: Instant, resend_after: Duration) -> bool {
        now.saturating_duration_since(self.last_sent) >= resend_after
    }
}

/// Outcome of a retry sweep.
#[derive(Debug, Default)]
pub struct DueDeliveries {
    /// Entries to transmit again. Their attempt count already includes this transmission.
    pub resend: Vec<RelayEntry>,
    /// Entries that ran out of attempts and were removed.
    pub abandoned: Vec<RelayEntry>,
}

/// The set of reliable datagrams awaiting acknowledgement, keyed by `(sequence, peer)`.
pub struct OutstandingDeliveries {
    entries: ShardedMap<DeliveryKey, RelayEntry>,
}

impl OutstandingDeliveries {
    /// Creates an empty set spread over `shards` locks.
    pub fn new(shards: usize) -> Self {
        Self { entries: ShardedMap::new(shards) }
    }

    /// Starts tracking a transmitted datagram.
    pub fn track(&self, entry: RelayEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Stops tracking an acknowledged datagram and returns it.
    pub fn acknowledge(&self, sequence: i32, peer_id: PeerId) -> Option<RelayEntry> {
        self.entries.remove(&(sequence, peer_id))
    }

    /// Returns true if the datagram is still awaiting acknowledgement.
    pub fn contains(&self, sequence: i32, peer_id: PeerId) -> bool {
        self.entries.contains_key(&(sequence, peer_id))
    }

    /// Finds entries whose resend timer elapsed.
    ///
    /// Entries that already used `max_attempts` transmissions are removed and reported as
    /// abandoned; the others are stamped with `now` and returned for retransmission.
    pub fn collect_due(
        &self,
        now: Instant,
        resend_after: Duration,
        max_attempts: u32,
    ) -> DueDeliveries {
        let abandoned = self
            .entries
            .drain_where(|_, entry| {
                entry.is_due(now, resend_after) && entry.attempts >= max_attempts
            })
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();

        let mut resend = Vec::new();
        self.entries.for_each_mut(|_, entry| {
            if entry.is_due(now, resend_after) {
                entry.attempts += 1;
                entry.last_sent = now;
                resend.push(entry.clone());
            }
        });

        DueDeliveries { resend, abandoned }
    }

    /// Drops every entry destined to `peer_id`.
    pub fn remove_peer(&self, peer_id: PeerId) -> Vec<RelayEntry> {
        self.entries
            .drain_where(|(_, destination), _| *destination == peer_id)
            .into_iter()
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Number of datagrams awaiting acknowledgement.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing awaits acknowledgement.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
