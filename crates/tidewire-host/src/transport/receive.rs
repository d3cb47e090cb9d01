use std::{net::SocketAddr, sync::Arc, time::Instant};

use tidewire_core::{
    constants::SERVER_PEER_ID,
    error::{ErrorKind, Result},
    shared::SharedBytes,
    BinaryStream, PeerId,
};
use tidewire_peer::Arrival;
use tidewire_protocol::{
    ConnectReply, ConnectRequest, FramingDecoder, Operation, PacketHeader, Target,
};
use tracing::{debug, error, info, trace, warn};

use super::Shared;
use crate::{
    event_types::{DisconnectReason, TransportEvent},
    handler::Delivery,
    message::Message,
    socket::is_timeout,
};

/// Reads datagrams until the transport stops running.
pub(super) fn run(shared: Arc<Shared>) {
    // One spare byte so a datagram over the limit is seen whole instead of truncated.
    let capacity = shared.config.max_packet_size + 1;
    let mut buffer = BinaryStream::with_encoding(capacity, shared.config.text_encoding);

    while shared.is_running() {
        let (len, address) = match shared.socket.receive_datagram(buffer.buffer_mut()) {
            Ok(received) => received,
            Err(err) if is_timeout(&err) => continue,
            Err(err) => {
                if shared.is_running() {
                    error!("Encountered an error receiving data: {:?}", err);
                }
                continue;
            }
        };
        // Zero-length datagrams only wake the loop.
        if len == 0 || buffer.reset(0, len).is_err() {
            continue;
        }
        handle_datagram(&shared, buffer.as_slice(), address);
    }
    debug!("receive loop on {} stopped", shared.local_addr);
}

fn handle_datagram(shared: &Shared, bytes: &[u8], address: SocketAddr) {
    shared.diagnostics.record_received(bytes.len());

    let max_size = shared.config.max_packet_size;
    let (header, payload) = match FramingDecoder::decode_within(bytes, max_size) {
        Ok(decoded) => decoded,
        Err(err) => {
            shared.diagnostics.record_malformed();
            debug!("Dropping malformed datagram ({} bytes) from {}: {}", bytes.len(), address, err);
            return;
        }
    };

    trace!("received {:?} ({} bytes) from {}", header.operation, bytes.len(), address);
    let now = shared.now();
    match header.operation {
        Operation::ConnectAndPing if shared.is_server() => {
            on_connect_request(shared, payload, address, now)
        }
        Operation::ConnectAndPing => on_connect_reply(shared, &header, payload, address, now),
        Operation::Disconnect => on_disconnect(shared, address),
        Operation::Acknowledgement => on_acknowledgement(shared, &header, address, now),
        Operation::Sequence | Operation::Data => {
            on_application(shared, &header, payload, bytes.len(), address, now)
        }
    }
}

fn on_connect_request(shared: &Shared, payload: &[u8], address: SocketAddr, now: Instant) {
    let request = match ConnectRequest::from_bytes(payload) {
        Ok(request) => request,
        Err(err) => {
            shared.diagnostics.record_malformed();
            debug!("Dropping handshake from {}: {}", address, err);
            return;
        }
    };

    let registry = &shared.registry;
    let bound = registry.lookup(&address);
    let peer_id = match bound {
        // A retry or keep-alive of the current session.
        Some(id) if registry.session_token(id) == Some(request.session_token) => {
            registry.touch(id, now);
            id
        }
        stale => match admit(shared, address, stale, request.session_token, now) {
            Ok(id) => id,
            Err(err) => {
                warn!("Ignoring handshake from {}: {}", address, err);
                return;
            }
        },
    };

    let reply = ConnectReply::answer(&request, shared.seconds(now));
    match reply.to_bytes() {
        Ok(bytes) => shared.enqueue(Message::control(
            address,
            Operation::ConnectAndPing,
            peer_id,
            SharedBytes::from_vec(bytes),
        )),
        Err(err) => error!("Error encoding handshake reply: {}", err),
    }
}

/// Binds `address` to a fresh id for a new session.
///
/// A stale binding from the same address normally gets torn down by `register`; when the
/// pool is empty it is torn down first so its id can be reused.
fn admit(
    shared: &Shared,
    address: SocketAddr,
    stale: Option<PeerId>,
    session_token: u32,
    now: Instant,
) -> Result<PeerId> {
    let registry = &shared.registry;
    let id = match (registry.allocate(), stale) {
        (Some(id), _) => id,
        (None, Some(stale)) => {
            if registry.unregister(stale).is_some() {
                report_replaced(shared, stale, address);
            }
            registry.allocate().ok_or(ErrorKind::NoAvailableIds)?
        }
        (None, None) => return Err(ErrorKind::NoAvailableIds),
    };
    if let Some(displaced) = registry.register(address, id, session_token, now) {
        report_replaced(shared, displaced, address);
    }
    info!("Peer {} connected from {}", id, address);
    shared.emit(TransportEvent::PeerConnected { peer_id: id, address });
    Ok(id)
}

fn report_replaced(shared: &Shared, peer_id: PeerId, address: SocketAddr) {
    shared.outstanding.remove_peer(peer_id);
    shared.emit(TransportEvent::PeerDisconnected {
        peer_id,
        address,
        reason: DisconnectReason::Replaced,
    });
}

fn on_connect_reply(
    shared: &Shared,
    header: &PacketHeader,
    payload: &[u8],
    address: SocketAddr,
    now: Instant,
) {
    let Some(client) = &shared.client else {
        return;
    };
    let reply = match ConnectReply::from_bytes(payload) {
        Ok(reply) => reply,
        Err(err) => {
            shared.diagnostics.record_malformed();
            debug!("Dropping handshake reply from {}: {}", address, err);
            return;
        }
    };

    let mut state = client.lock();
    if address != state.server || reply.session_token != state.session_token {
        debug!("Ignoring handshake reply from {} for another session", address);
        return;
    }
    if state.disconnected {
        return;
    }
    let newly_assigned = state.peer_id != Some(header.peer_id);
    state.peer_id = Some(header.peer_id);
    drop(state);

    shared.registry.touch(SERVER_PEER_ID, now);
    if !shared.diagnostics.record_ping(reply.client_time, reply.server_time, shared.seconds(now)) {
        debug!("Ignoring round trip from {}: echoed times are out of range", address);
    }
    if newly_assigned {
        info!("Connected to {} as peer {}", address, header.peer_id);
        shared.emit(TransportEvent::Connected { peer_id: header.peer_id });
    }
}

fn on_disconnect(shared: &Shared, address: SocketAddr) {
    match &shared.client {
        None => {
            let Some(peer_id) = shared.registry.lookup(&address) else {
                return;
            };
            if shared.registry.unregister(peer_id).is_some() {
                shared.outstanding.remove_peer(peer_id);
                info!("Peer {} at {} disconnected", peer_id, address);
                shared.emit(TransportEvent::PeerDisconnected {
                    peer_id,
                    address,
                    reason: DisconnectReason::Requested,
                });
            }
        }
        Some(client) => {
            let mut state = client.lock();
            if address != state.server || state.disconnected {
                return;
            }
            let was_connected = state.peer_id.take().is_some();
            state.disconnected = true;
            state.pending.clear();
            drop(state);

            shared.outstanding.remove_peer(SERVER_PEER_ID);
            if was_connected {
                info!("Disconnected by server {}", address);
                shared.emit(TransportEvent::Disconnected);
            }
        }
    }
}

/// Id of the peer that sent a datagram from `address`, if it holds a live binding.
fn sender_of(shared: &Shared, address: &SocketAddr) -> Option<PeerId> {
    match &shared.client {
        None => shared.registry.lookup(address),
        Some(client) => {
            let state = client.lock();
            (state.server == *address && state.connected_id().is_some()).then_some(SERVER_PEER_ID)
        }
    }
}

fn on_acknowledgement(shared: &Shared, header: &PacketHeader, address: SocketAddr, now: Instant) {
    let (Some(sequence), Some(sender)) = (header.sequence, sender_of(shared, &address)) else {
        return;
    };
    if let Some(entry) = shared.outstanding.acknowledge(sequence, sender) {
        shared.registry.touch(sender, now);
        // Only first transmissions give an unambiguous round trip.
        if entry.attempts == 1 {
            shared.diagnostics.record_rtt(now.saturating_duration_since(entry.first_sent));
        }
    }
}

fn on_application(
    shared: &Shared,
    header: &PacketHeader,
    payload: &[u8],
    size: usize,
    address: SocketAddr,
    now: Instant,
) {
    let Some(sender) = sender_of(shared, &address) else {
        debug!("Dropping {:?} datagram from unknown address {}", header.operation, address);
        return;
    };
    shared.registry.touch(sender, now);
    shared.registry.record_received(sender, size);

    if !header.channel.is_reliable() {
        dispatch(shared, header, sender, address, payload);
        return;
    }

    let Some(sequence) = header.sequence else {
        return;
    };
    let arrival = shared
        .registry
        .with_channel(sender, header.channel, |state| state.receive(sequence, payload));
    let Some(arrival) = arrival else {
        return;
    };

    if arrival.should_acknowledge() {
        let local_id = shared.local_peer_id().unwrap_or(SERVER_PEER_ID);
        shared.enqueue(Message::acknowledgement(address, header.channel, local_id, sequence));
    }
    match arrival {
        Arrival::Deliver { followers } => {
            dispatch(shared, header, sender, address, payload);
            for follower in followers {
                dispatch(shared, header, sender, address, &follower);
            }
        }
        Arrival::Rejected => {
            debug!("Reorder buffer full for peer {}; not acknowledging {}", sender, sequence)
        }
        Arrival::Buffered | Arrival::Duplicate => {}
    }
}

/// Hands one payload to the local handler and, on the server, forwards it.
fn dispatch(
    shared: &Shared,
    header: &PacketHeader,
    sender: PeerId,
    address: SocketAddr,
    payload: &[u8],
) {
    if !shared.is_server() {
        let delivery = Delivery {
            peer_id: header.peer_id,
            address,
            channel: header.channel,
            target: header.target,
            operation: header.operation,
            is_server: false,
        };
        if let Some(reply) = shared.deliver(&delivery, payload) {
            shared.enqueue(Message::outbound(
                SharedBytes::from_vec(reply),
                header.channel,
                Target::Server,
                SERVER_PEER_ID,
                Operation::Sequence,
            ));
        }
        return;
    }

    let (to_server, relay) = match header.target {
        Target::Server => (true, false),
        Target::All | Target::AllImmediately | Target::Others => (true, true),
        Target::Single | Target::SingleImmediately => {
            let to_server = header.peer_id == SERVER_PEER_ID;
            (to_server, !to_server)
        }
    };

    if to_server {
        let delivery = Delivery {
            peer_id: sender,
            address,
            channel: header.channel,
            target: header.target,
            operation: header.operation,
            is_server: true,
        };
        if let Some(reply) = shared.deliver(&delivery, payload) {
            shared.enqueue(Message::outbound(
                SharedBytes::from_vec(reply),
                header.channel,
                Target::Single,
                sender,
                Operation::Data,
            ));
        }
    }
    if relay {
        shared.enqueue(Message::relay(
            SharedBytes::copy_from_slice(payload),
            header.channel,
            header.target,
            header.peer_id,
            sender,
        ));
    }
}
