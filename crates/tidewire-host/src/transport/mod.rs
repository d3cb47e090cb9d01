//! The threaded transport.
//!
//! A transport owns one datagram socket and two threads: a receive loop that decodes, acknowledges
//! and dispatches inbound datagrams, and a send loop that drains the outbound queue, assigns
//! sequences, fans messages out and services the retry, handshake, ping and idle timers.
//!
//! # Module Organization
//!
//! - [`routing`] - resolves the destinations of an outbound message
//! - [`receive`] - the receive loop
//! - [`send`] - the send loop and its timers

mod receive;
mod routing;
mod send;

use std::{
    collections::VecDeque,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tidewire_core::{
    config::Config,
    constants::SERVER_PEER_ID,
    error::{ErrorKind, Result},
    pool::{Pooled, StreamPool},
    shared::SharedBytes,
    transport::DatagramSocket,
    BinaryStream, PeerId,
};
use tidewire_peer::PeerRegistry;
use tidewire_protocol::{ChannelKind, Operation, OutstandingDeliveries, Target};
use tracing::{debug, info, trace, warn};

use crate::{
    diagnostics::{Diagnostics, DiagnosticsSnapshot},
    event_types::{DisconnectReason, TransportEvent},
    handler::{Delivery, MessageHandler},
    message::Message,
    queue::{SendQueue, Work},
    socket::{loopback_for, UdpDatagramSocket},
    time::{Clock, SystemClock},
};

/// Which side of the star topology a transport plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts handshakes, assigns peer ids and relays client traffic.
    Server,
    /// Connects to the server at the given address.
    Client {
        /// Server address.
        server: SocketAddr,
    },
}

/// Connection state of a client transport.
#[derive(Debug)]
pub(crate) struct ClientState {
    pub(crate) server: SocketAddr,
    pub(crate) session_token: u32,
    pub(crate) peer_id: Option<PeerId>,
    pub(crate) started: Instant,
    pub(crate) last_ping: Option<Instant>,
    pub(crate) timeout_reported: bool,
    pub(crate) disconnected: bool,
    /// Application messages queued before the handshake completed.
    pub(crate) pending: VecDeque<Message>,
}

impl ClientState {
    fn new(server: SocketAddr, session_token: u32, now: Instant) -> Self {
        Self {
            server,
            session_token,
            peer_id: None,
            started: now,
            last_ping: None,
            timeout_reported: false,
            disconnected: false,
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn connected_id(&self) -> Option<PeerId> {
        if self.disconnected {
            None
        } else {
            self.peer_id
        }
    }
}

/// State shared by the public handle and both loops.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) role: Role,
    pub(crate) socket: Arc<dyn DatagramSocket>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) registry: PeerRegistry,
    pub(crate) outstanding: OutstandingDeliveries,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) queue: SendQueue,
    pub(crate) events: Sender<TransportEvent>,
    pub(crate) streams: StreamPool,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) epoch: Instant,
    /// Cleared as soon as `close` starts; gates the public API.
    pub(crate) open: AtomicBool,
    /// Cleared once shutdown work is queued; stops both loops.
    pub(crate) running: AtomicBool,
    pub(crate) client: Option<Mutex<ClientState>>,
}

impl Shared {
    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Seconds since the transport opened, as carried in handshake payloads.
    pub(crate) fn seconds(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.epoch).as_secs_f64()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_server(&self) -> bool {
        matches!(self.role, Role::Server)
    }

    /// Id this transport is known by: 0 on the server, the assigned id on a connected client.
    pub(crate) fn local_peer_id(&self) -> Option<PeerId> {
        match &self.client {
            None => Some(SERVER_PEER_ID),
            Some(client) => client.lock().connected_id(),
        }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        // The receiver lives as long as the public handle.
        let _ = self.events.send(event);
    }

    /// Queues work for the send loop, counting whatever the overflow policy drops.
    pub(crate) fn enqueue(&self, message: Message) {
        if let Some(Work::Send(dropped)) = self.queue.push(Work::Send(message)) {
            self.report_dropped(&dropped);
        }
    }

    /// Accounts for a message discarded because a queue was full.
    ///
    /// Reliable application messages are reported as [`TransportEvent::DeliveryDropped`].
    pub(crate) fn report_dropped(&self, message: &Message) {
        self.diagnostics.record_queue_overflow();
        warn!(
            "Send queue full; dropped a {:?} message ({} bytes) on {:?}",
            message.operation,
            message.payload.len(),
            message.channel
        );
        if message.channel.is_reliable() && !message.is_control() {
            self.emit(TransportEvent::DeliveryDropped {
                peer_id: message.peer_id,
                target: message.target,
                channel: message.channel,
            });
        }
    }

    /// Runs the handler on a copy of `payload`. Returns the reply, if the handler wrote one.
    pub(crate) fn deliver(&self, delivery: &Delivery, payload: &[u8]) -> Option<Vec<u8>> {
        let (mut input, mut reply) = match (self.streams.acquire(), self.streams.acquire()) {
            (Ok(input), Ok(reply)) => (input, reply),
            _ => return None,
        };
        if let Err(err) = input.load(payload) {
            debug!("Dropping delivery from peer {}: {}", delivery.peer_id, err);
            return None;
        }
        self.handler.on_message(delivery, &mut input, &mut reply);
        if reply.is_empty() {
            None
        } else {
            Some(reply.as_slice().to_vec())
        }
    }

    /// Delivery descriptor for a payload this transport sent to itself.
    pub(crate) fn loopback_delivery(&self, channel: ChannelKind, target: Target) -> Delivery {
        let (peer_id, operation) = match self.role {
            Role::Server => (SERVER_PEER_ID, Operation::Data),
            Role::Client { .. } => {
                (self.local_peer_id().unwrap_or(SERVER_PEER_ID), Operation::Sequence)
            }
        };
        Delivery {
            peer_id,
            address: self.local_addr,
            channel,
            target,
            operation,
            is_server: self.is_server(),
        }
    }

    /// Writes `bytes` to the socket and updates the counters.
    pub(crate) fn send_raw(&self, peer_id: Option<PeerId>, address: SocketAddr, bytes: &[u8]) {
        match self.socket.send_datagram(&address, bytes) {
            Ok(_) => {
                trace!("sent {} bytes to {}", bytes.len(), address);
                self.diagnostics.record_sent(bytes.len());
                if let Some(peer_id) = peer_id {
                    self.registry.record_sent(peer_id, bytes.len());
                }
            }
            Err(err) => warn!("Error occurred sending a packet (to {}): {}", address, err),
        }
    }
}

/// A running tidewire endpoint, either a server or a client.
///
/// Dropping the transport closes it.
pub struct Transport {
    shared: Arc<Shared>,
    events: Receiver<TransportEvent>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.shared.role)
            .field("local_addr", &self.shared.local_addr)
            .field("running", &self.shared.is_running())
            .finish()
    }
}

impl Transport {
    /// Starts a server bound to `config.bind_address`.
    pub fn bind_server(config: Config, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        Self::open(config, Role::Server, handler)
    }

    /// Starts a client bound to `config.bind_address` that connects to `server`.
    pub fn connect(
        config: Config,
        server: SocketAddr,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self> {
        Self::open(config, Role::Client { server }, handler)
    }

    /// Binds a UDP socket and starts a transport with the system clock.
    pub fn open(config: Config, role: Role, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        let socket = UdpDatagramSocket::bind(&config)?;
        Self::open_with(config, role, handler, Arc::new(socket), Arc::new(SystemClock))
    }

    /// Starts a transport over the given socket and clock.
    pub fn open_with(
        config: Config,
        role: Role,
        handler: Arc<dyn MessageHandler>,
        socket: Arc<dyn DatagramSocket>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let local_addr = socket.local_addr()?;
        let now = clock.now();
        let (events_tx, events_rx) = unbounded();

        let registry = PeerRegistry::bounded(
            config.lock_shards,
            config.reorder_buffer_limit,
            config.max_peers,
        );
        let client = match role {
            Role::Server => None,
            Role::Client { server } => {
                let session_token: u32 = rand::random();
                // The server is addressed as peer 0; its channel states live under that id.
                registry.register(server, SERVER_PEER_ID, session_token, now);
                Some(Mutex::new(ClientState::new(server, session_token, now)))
            }
        };

        let shared = Arc::new(Shared {
            role,
            socket,
            local_addr,
            registry,
            outstanding: OutstandingDeliveries::new(config.lock_shards),
            diagnostics: Diagnostics::new(
                config.rtt_smoothing_factor,
                config.handshake_timeout,
                now,
            ),
            handler,
            queue: SendQueue::new(config.send_queue_capacity, config.overflow_policy),
            events: events_tx,
            streams: StreamPool::for_streams(
                config.stream_pool_size,
                config.max_packet_size,
                config.text_encoding,
            ),
            clock,
            epoch: now,
            open: AtomicBool::new(true),
            running: AtomicBool::new(true),
            client,
            config,
        });

        let transport = Transport { shared, events: events_rx, threads: Mutex::new(Vec::new()) };
        transport.spawn("tidewire-recv", receive::run)?;
        transport.spawn("tidewire-send", send::run)?;

        info!("{:?} transport listening on {}", role, local_addr);
        Ok(transport)
    }

    fn spawn(&self, name: &str, body: fn(Arc<Shared>)) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new().name(name.to_string()).spawn(move || body(shared)) {
            Ok(handle) => {
                self.threads.lock().push(handle);
                Ok(())
            }
            Err(err) => {
                self.close();
                Err(ErrorKind::IoError(err))
            }
        }
    }

    /// Sends `payload` on `channel` to `target`.
    ///
    /// `peer_id` names the destination for single targets and is ignored otherwise. Local
    /// deliveries for immediate targets run the handler before this returns; everything else is
    /// queued for the send loop.
    pub fn send(
        &self,
        payload: &[u8],
        channel: ChannelKind,
        target: Target,
        peer_id: PeerId,
    ) -> Result<()> {
        let shared = &self.shared;
        if !shared.is_open() {
            return Err(ErrorKind::AlreadyDisposed);
        }
        let needed = payload.len() + channel.header_size();
        if needed > shared.config.max_packet_size {
            return Err(ErrorKind::CapacityExceeded {
                needed,
                remaining: shared.config.max_packet_size,
            });
        }

        let local_id = shared.local_peer_id();
        if target.is_immediate() {
            let to_self = target == Target::AllImmediately || local_id == Some(peer_id);
            if to_self {
                // Replies to a loopback delivery have nowhere to go.
                let _ = shared.deliver(&shared.loopback_delivery(channel, target), payload);
                if target == Target::SingleImmediately {
                    return Ok(());
                }
            }
        }

        let operation = if shared.is_server() { Operation::Data } else { Operation::Sequence };
        shared.enqueue(Message::outbound(
            SharedBytes::copy_from_slice(payload),
            channel,
            target,
            peer_id,
            operation,
        ));
        Ok(())
    }

    /// Sends the written bytes of `stream`.
    pub fn send_stream(
        &self,
        stream: &BinaryStream,
        channel: ChannelKind,
        target: Target,
        peer_id: PeerId,
    ) -> Result<()> {
        self.send(stream.as_slice(), channel, target, peer_id)
    }

    /// Borrows a datagram-sized stream from the transport's pool.
    pub fn acquire_stream(&self) -> Result<Pooled<'_, BinaryStream>> {
        self.shared.streams.acquire()
    }

    /// Drops the binding of `peer_id`.
    ///
    /// On the server this notifies the client and forgets it. On a client any id disconnects
    /// from the server.
    pub fn disconnect(&self, peer_id: PeerId) -> Result<()> {
        let shared = &self.shared;
        if !shared.is_open() {
            return Err(ErrorKind::AlreadyDisposed);
        }

        match &shared.client {
            None => {
                if let Some(record) = shared.registry.unregister(peer_id) {
                    shared.outstanding.remove_peer(peer_id);
                    shared.enqueue(Message::disconnect(record.address, SERVER_PEER_ID));
                    shared.emit(TransportEvent::PeerDisconnected {
                        peer_id,
                        address: record.address,
                        reason: DisconnectReason::Requested,
                    });
                }
            }
            Some(client) => {
                let mut state = client.lock();
                let was_connected = state.connected_id();
                state.disconnected = true;
                state.pending.clear();
                let server = state.server;
                drop(state);

                if let Some(id) = was_connected {
                    shared.outstanding.remove_peer(SERVER_PEER_ID);
                    shared.enqueue(Message::disconnect(server, id));
                    shared.emit(TransportEvent::Disconnected);
                }
            }
        }
        Ok(())
    }

    /// Stops both loops and releases every resource. Safe to call more than once.
    pub fn close(&self) {
        let shared = &self.shared;
        if !shared.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let mut was_connected = false;
        match &shared.client {
            None => {
                for (_, address) in shared.registry.peers() {
                    shared.enqueue(Message::disconnect(address, SERVER_PEER_ID));
                }
            }
            Some(client) => {
                let mut state = client.lock();
                if let Some(id) = state.connected_id() {
                    was_connected = true;
                    shared.enqueue(Message::disconnect(state.server, id));
                }
                state.disconnected = true;
                state.pending.clear();
            }
        }
        shared.queue.push(Work::Shutdown);
        shared.running.store(false, Ordering::Release);

        // Wake the receive loop instead of waiting out its read timeout.
        if let Err(err) = shared.socket.send_datagram(&loopback_for(shared.local_addr), &[]) {
            debug!("Could not wake the receive loop: {}", err);
        }

        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            if handle.thread().id() != current && handle.join().is_err() {
                warn!("A transport thread panicked");
            }
        }

        if was_connected {
            shared.emit(TransportEvent::Disconnected);
        }
        shared.registry.clear();
        shared.outstanding.clear();
        shared.streams.close();
        info!("Transport on {} closed", shared.local_addr);
    }

    /// Receiver for transport events.
    pub fn events(&self) -> Receiver<TransportEvent> {
        self.events.clone()
    }

    /// Takes the next pending event, if any.
    pub fn try_event(&self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Role this transport plays.
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// 0 on the server; the assigned id on a connected client.
    pub fn local_peer_id(&self) -> Option<PeerId> {
        if self.shared.is_open() {
            self.shared.local_peer_id()
        } else {
            None
        }
    }

    /// True while the server is open, or while a client holds an assigned id.
    pub fn is_connected(&self) -> bool {
        self.local_peer_id().is_some()
    }

    /// Number of connected clients on the server; 1 or 0 on a client.
    pub fn peer_count(&self) -> usize {
        if self.shared.is_server() {
            self.shared.registry.peer_count()
        } else {
            usize::from(self.is_connected())
        }
    }

    /// Connected clients and their addresses, ordered by id. Empty on a client.
    pub fn peers(&self) -> Vec<(PeerId, SocketAddr)> {
        if self.shared.is_server() {
            self.shared.registry.peers()
        } else {
            Vec::new()
        }
    }

    /// Statistics of one peer binding (0 is the server on a client).
    pub fn peer_statistics(&self, peer_id: PeerId) -> Option<tidewire_peer::PeerStatistics> {
        self.shared.registry.statistics(peer_id)
    }

    /// Reliable datagrams still waiting for an acknowledgement.
    pub fn outstanding_count(&self) -> usize {
        self.shared.outstanding.len()
    }

    /// Current counters and estimates.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    /// Configuration the transport was opened with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
