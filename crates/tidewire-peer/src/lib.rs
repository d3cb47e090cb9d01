#![warn(missing_docs)]

//! tidewire-peer: peer registry and per-channel reliability state.

/// Sequence assignment, duplicate detection and reordering per channel.
pub mod channel_state;
/// Peer bindings, id pool and channel state storage.
pub mod registry;
/// Per-peer traffic counters.
pub mod statistics;

pub use channel_state::{Arrival, ChannelState};
pub use registry::{ChannelKey, PeerRecord, PeerRegistry};
pub use statistics::PeerStatistics;
