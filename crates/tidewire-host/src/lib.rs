#![warn(missing_docs)]

//! tidewire-host: the threaded UDP transport over protocol/peer.

/// Transport counters, latency and throughput.
pub mod diagnostics;
/// Event types (TransportEvent, DisconnectReason).
pub mod event_types;
/// Application handlers and the call-id registry.
pub mod handler;
/// Outbound work items.
pub mod message;
/// Bounded send queue with an overflow policy.
pub mod queue;
/// UDP socket setup.
pub mod socket;
/// Throughput monitoring utilities.
pub mod throughput;
/// Time utilities for the host.
pub mod time;
/// Server and client transport.
pub mod transport;

pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use event_types::{DisconnectReason, TransportEvent};
pub use handler::{Delivery, HandlerRegistry, MessageHandler, RemoteCall};
pub use socket::UdpDatagramSocket;
pub use time::{Clock, ManualClock, SystemClock};
pub use transport::{Role, Transport};
