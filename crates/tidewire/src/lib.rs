#![warn(missing_docs)]

//! Tidewire: a small public API facade for the workspace.
//!
//! This crate re-exports the types needed to build a client/server UDP application:
//!
//! - Transport, roles and events (`Transport`, `Role`, `TransportEvent`)
//! - Channels and targets (`ChannelKind`, `Target`)
//! - Handlers (`MessageHandler`, `HandlerRegistry`, `Delivery`)
//! - The binary stream payloads are written with (`BinaryStream`)
//! - Core configuration (`Config`)
//!
//! Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use tidewire::prelude::*;
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register(1, |_: &Delivery, payload: &mut BinaryStream, reply: &mut BinaryStream| {
//!     let name = payload.read_string()?;
//!     reply.write_string(&format!("hello {}", name))
//! });
//!
//! let config = Config::bound_to("127.0.0.1:5055".parse().unwrap());
//! let server = Transport::bind_server(config, registry).unwrap();
//! println!("listening on {}", server.local_addr());
//! ```

// Core config, errors and streams
pub use tidewire_core::{
    config::{Config, OverflowPolicy},
    error::{ErrorKind, Result},
    BinaryStream, PeerId, TextEncoding,
};
// Host: transport, handlers and events
pub use tidewire_host::{
    Delivery, DiagnosticsSnapshot, DisconnectReason, HandlerRegistry, MessageHandler, RemoteCall,
    Role, Transport, TransportEvent,
};
// Peer: per-binding counters
pub use tidewire_peer::PeerStatistics;
// Protocol: wire enums
pub use tidewire_protocol::{ChannelKind, Operation, Target};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        BinaryStream, ChannelKind, Config, Delivery, ErrorKind, HandlerRegistry, MessageHandler,
        PeerId, Target, Transport, TransportEvent,
    };
}
