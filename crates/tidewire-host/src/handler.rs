//! Application message handlers.
//!
//! The transport hands every delivered payload to a single `MessageHandler`. Applications that
//! route by call id register explicit handlers in a `HandlerRegistry` and pass the registry as
//! the transport's handler.

use std::{collections::HashMap, net::SocketAddr};

use parking_lot::RwLock;
use tidewire_core::{
    error::{ErrorKind, Result},
    BinaryStream, PeerId,
};
use tidewire_protocol::{ChannelKind, Operation, Target};
use tracing::debug;

/// Where a delivered payload came from and how it was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Originating peer: the sending client on the server, the relayed originator (0 for
    /// the server itself) on a client.
    pub peer_id: PeerId,
    /// Address the datagram arrived from, or the local address for loopback deliveries.
    pub address: SocketAddr,
    /// Channel the payload travelled on.
    pub channel: ChannelKind,
    /// Target the sender used.
    pub target: Target,
    /// `Sequence` for client-originated payloads, `Data` for server-originated or relayed ones.
    pub operation: Operation,
    /// True when the receiving transport is the server.
    pub is_server: bool,
}

/// Receives every payload the transport delivers.
///
/// Anything written to `reply` is sent back to the sender on the same channel. Handlers run on
/// the receive thread, the send thread, or the caller thread for immediate targets, so they
/// must be cheap and thread-safe.
pub trait MessageHandler: Send + Sync {
    /// Handles one payload.
    fn on_message(&self, delivery: &Delivery, payload: &mut BinaryStream, reply: &mut BinaryStream);
}

impl<F> MessageHandler for F
where
    F: Fn(&Delivery, &mut BinaryStream, &mut BinaryStream) + Send + Sync,
{
    fn on_message(
        &self,
        delivery: &Delivery,
        payload: &mut BinaryStream,
        reply: &mut BinaryStream,
    ) {
        self(delivery, payload, reply)
    }
}

/// A handler registered under a call id.
pub trait RemoteCall: Send + Sync {
    /// Handles a payload whose call id was already consumed.
    fn call(
        &self,
        delivery: &Delivery,
        payload: &mut BinaryStream,
        reply: &mut BinaryStream,
    ) -> Result<()>;
}

impl<F> RemoteCall for F
where
    F: Fn(&Delivery, &mut BinaryStream, &mut BinaryStream) -> Result<()> + Send + Sync,
{
    fn call(
        &self,
        delivery: &Delivery,
        payload: &mut BinaryStream,
        reply: &mut BinaryStream,
    ) -> Result<()> {
        self(delivery, payload, reply)
    }
}

/// Dispatches payloads to handlers by a varint call id at the start of the payload.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<u32, Box<dyn RemoteCall>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `id`, returning the handler it replaces.
    pub fn register<H>(&self, id: u32, handler: H) -> Option<Box<dyn RemoteCall>>
    where
        H: RemoteCall + 'static,
    {
        self.handlers.write().insert(id, Box::new(handler))
    }

    /// Removes the handler registered under `id`.
    pub fn unregister(&self, id: u32) -> Option<Box<dyn RemoteCall>> {
        self.handlers.write().remove(&id)
    }

    /// Returns true if a handler is registered under `id`.
    pub fn contains(&self, id: u32) -> bool {
        self.handlers.read().contains_key(&id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Runs the handler registered under `id`.
    pub fn dispatch(
        &self,
        id: u32,
        delivery: &Delivery,
        payload: &mut BinaryStream,
        reply: &mut BinaryStream,
    ) -> Result<()> {
        let handlers = self.handlers.read();
        let handler = handlers.get(&id).ok_or(ErrorKind::UnknownHandler(id))?;
        handler.call(delivery, payload, reply)
    }

    /// Writes the call id that `on_message` dispatches on.
    pub fn write_call_id(stream: &mut BinaryStream, id: u32) -> Result<()> {
        stream.write_7bit_encoded_int(id as i32)
    }
}

impl MessageHandler for HandlerRegistry {
    fn on_message(
        &self,
        delivery: &Delivery,
        payload: &mut BinaryStream,
        reply: &mut BinaryStream,
    ) {
        let id = match payload.read_7bit_encoded_int() {
            Ok(id) => id as u32,
            Err(err) => {
                debug!("payload from peer {} has no call id: {}", delivery.peer_id, err);
                return;
            }
        };
        if let Err(err) = self.dispatch(id, delivery, payload, reply) {
            debug!("call {} from peer {} failed: {}", id, delivery.peer_id, err);
        }
    }
}
