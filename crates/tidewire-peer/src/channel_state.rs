//! Per-channel reliability state.
//!
//! One `ChannelState` exists for each `(peer, channel kind)` pair. On the sending side it hands
//! out sequence numbers; on the receiving side it decides whether an arrival is delivered,
//! buffered until its predecessors show up, or discarded as a duplicate.
//!
//! - **Unreliable**: stateless, every arrival is delivered.
//! - **Reliable**: delivered once on first receipt, in arrival order.
//! - **ReliableOrdered**: delivered once, strictly in sequence order.

use std::collections::{BTreeMap, HashSet};

use tidewire_core::constants::FIRST_SEQUENCE;
use tidewire_protocol::ChannelKind;

/// What to do with an arrival.
#[derive(Debug, PartialEq, Eq)]
pub enum Arrival {
    /// Deliver the arrival now, then each follower in order.
    Deliver {
        /// Buffered payloads released by this arrival.
        followers: Vec<Vec<u8>>,
    },
    /// Held until the missing predecessors arrive.
    Buffered,
    /// Already received. Acknowledge again, deliver nothing.
    Duplicate,
    /// The reorder buffer is full. Do not acknowledge; the sender will retransmit.
    Rejected,
}

impl Arrival {
    fn deliver() -> Self {
        Arrival::Deliver { followers: Vec::new() }
    }

    /// Returns true if the sender should be acknowledged.
    pub fn should_acknowledge(&self) -> bool {
        !matches!(self, Arrival::Rejected)
    }
}

/// Sequence tracking for one channel towards one peer.
#[derive(Debug)]
pub struct ChannelState {
    kind: ChannelKind,
    /// Next sequence to hand out
    sent_seq: i32,
    /// Every sequence up to here has been delivered
    last_processed_seq: i32,
    /// Highest sequence accepted so far
    last_received_seq: i32,
    /// Delivered sequences above the floor (Reliable)
    seen_acks: HashSet<i32>,
    /// Payloads waiting for a gap to close (ReliableOrdered)
    reorder_buffer: BTreeMap<i32, Vec<u8>>,
    reorder_limit: usize,
}

impl ChannelState {
    /// Creates the state for one channel with a bounded reorder buffer.
    pub fn new(kind: ChannelKind, reorder_limit: usize) -> Self {
        Self {
            kind,
            sent_seq: FIRST_SEQUENCE,
            last_processed_seq: FIRST_SEQUENCE - 1,
            last_received_seq: FIRST_SEQUENCE - 1,
            seen_acks: HashSet::new(),
            reorder_buffer: BTreeMap::new(),
            reorder_limit,
        }
    }

    /// Channel kind this state belongs to.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Hands out the next outgoing sequence. Sequence 0 is never used.
    pub fn next_sequence(&mut self) -> i32 {
        let sequence = self.sent_seq;
        self.sent_seq = match self.sent_seq.wrapping_add(1) {
            0 => FIRST_SEQUENCE,
            next => next,
        };
        sequence
    }

    /// Classifies an arriving datagram.
    ///
    /// `payload` is only copied when it has to wait in the reorder buffer.
    pub fn receive(&mut self, sequence: i32, payload: &[u8]) -> Arrival {
        match self.kind {
            ChannelKind::Unreliable => Arrival::deliver(),
            ChannelKind::Reliable => self.receive_reliable(sequence),
            ChannelKind::ReliableOrdered => self.receive_ordered(sequence, payload),
        }
    }

    fn receive_reliable(&mut self, sequence: i32) -> Arrival {
        if sequence <= self.last_processed_seq || !self.seen_acks.insert(sequence) {
            return Arrival::Duplicate;
        }
        self.last_received_seq = self.last_received_seq.max(sequence);

        // Raise the floor over the contiguous run so the set stays small.
        while self.seen_acks.remove(&(self.last_processed_seq + 1)) {
            self.last_processed_seq += 1;
        }
        Arrival::deliver()
    }

    fn receive_ordered(&mut self, sequence: i32, payload: &[u8]) -> Arrival {
        if sequence <= self.last_processed_seq {
            return Arrival::Duplicate;
        }

        if sequence == self.last_processed_seq + 1 {
            self.last_processed_seq = sequence;
            self.last_received_seq = self.last_received_seq.max(sequence);

            let mut followers = Vec::new();
            while let Some(next) = self.reorder_buffer.remove(&(self.last_processed_seq + 1)) {
                followers.push(next);
                self.last_processed_seq += 1;
            }
            return Arrival::Deliver { followers };
        }

        if self.reorder_buffer.contains_key(&sequence) {
            return Arrival::Duplicate;
        }
        if self.reorder_buffer.len() >= self.reorder_limit {
            return Arrival::Rejected;
        }
        self.reorder_buffer.insert(sequence, payload.to_vec());
        self.last_received_seq = self.last_received_seq.max(sequence);
        Arrival::Buffered
    }

    /// Every sequence up to and including this one has been delivered.
    pub fn last_processed_seq(&self) -> i32 {
        self.last_processed_seq
    }

    /// Highest sequence accepted.
    pub fn last_received_seq(&self) -> i32 {
        self.last_received_seq
    }

    /// Next sequence an ordered channel can deliver.
    pub fn expected_seq(&self) -> i32 {
        self.last_processed_seq + 1
    }

    /// Number of payloads waiting in the reorder buffer.
    pub fn buffered_len(&self) -> usize {
        self.reorder_buffer.len()
    }

    /// Number of delivered sequences tracked above the floor.
    pub fn seen_len(&self) -> usize {
        self.seen_acks.len()
    }
}
