use std::{net::SocketAddr, sync::Arc, time::Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tidewire_core::{constants::SERVER_PEER_ID, error::ErrorKind, shared::SharedBytes, PeerId};
use tidewire_protocol::{
    ChannelKind, ConnectRequest, FramingEncoder, Operation, PacketHeader, RelayEntry, Target,
};
use tracing::{debug, error, info, warn};

use super::{routing, ClientState, Role, Shared};
use crate::{
    event_types::{DisconnectReason, TransportEvent},
    message::Message,
    queue::Work,
};

/// Drains the send queue and services timers until shutdown.
pub(super) fn run(shared: Arc<Shared>) {
    let tick = shared.config.send_tick;
    let mut last_service: Option<Instant> = None;

    loop {
        match shared.queue.recv_timeout(tick) {
            Ok(Work::Send(message)) => dispatch(&shared, message),
            Ok(Work::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) if !shared.is_running() => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = shared.now();
        let due = last_service.map_or(true, |at| now.saturating_duration_since(at) >= tick);
        if shared.is_running() && due {
            last_service = Some(now);
            service_timers(&shared, now);
        }
    }

    // Flush what was queued before shutdown, disconnect notices included.
    while let Some(work) = shared.queue.try_recv() {
        if let Work::Send(message) = work {
            dispatch(&shared, message);
        }
    }
    debug!("send loop on {} stopped", shared.local_addr);
}

fn dispatch(shared: &Shared, message: Message) {
    if let Some(address) = message.address {
        send_control(shared, &message, address);
        return;
    }

    let route = match (&shared.role, &shared.client) {
        (Role::Client { server }, Some(client)) => {
            let mut state = client.lock();
            if state.disconnected {
                debug!("Dropping {:?} message; client is disconnected", message.target);
                return;
            }
            let Some(local_id) = state.peer_id else {
                let dropped = hold_until_connected(shared, &mut state, message);
                drop(state);
                if let Some(dropped) = dropped {
                    shared.report_dropped(&dropped);
                }
                return;
            };
            drop(state);
            routing::client_route(*server, local_id, &message)
        }
        _ => routing::server_route(&shared.registry, &message),
    };

    if route.local {
        let delivery = shared.loopback_delivery(message.channel, message.target);
        let _ = shared.deliver(&delivery, &message.payload);
    }
    if route.remotes.is_empty() && !route.local {
        debug!("No destination for {:?} message to peer {}", message.target, message.peer_id);
    }
    let header = PacketHeader::new(
        message.channel,
        message.target,
        route.operation,
        route.header_peer_id,
    );
    for (peer_id, address) in route.remotes {
        transmit(shared, &message, header, peer_id, address);
    }
}

/// Parks `message` until the handshake completes. Returns the oldest held message if the
/// backlog was full.
fn hold_until_connected(
    shared: &Shared,
    state: &mut ClientState,
    message: Message,
) -> Option<Message> {
    let dropped = if state.pending.len() >= shared.config.send_queue_capacity {
        state.pending.pop_front()
    } else {
        None
    };
    state.pending.push_back(message);
    dropped
}

/// Sends one copy of an application message, tracking it on reliable channels.
fn transmit(
    shared: &Shared,
    message: &Message,
    header: PacketHeader,
    peer_id: PeerId,
    address: SocketAddr,
) {
    let needed = header.size() + message.payload.len();
    if needed > shared.config.max_packet_size {
        warn!("Dropping {} byte datagram to peer {}: exceeds max packet size", needed, peer_id);
        return;
    }

    if !message.channel.is_reliable() {
        send_encoded(shared, Some(peer_id), address, &header, &message.payload);
        return;
    }

    let sequence =
        shared.registry.with_channel(peer_id, message.channel, |state| state.next_sequence());
    let Some(sequence) = sequence else {
        debug!("Peer {} is gone; dropping reliable datagram", peer_id);
        return;
    };
    let header = header.with_sequence(sequence);
    let datagram = match FramingEncoder::encode_to_vec(&header, &message.payload) {
        Ok(bytes) => SharedBytes::from_vec(bytes),
        Err(err) => {
            error!("Error encoding datagram for peer {}: {}", peer_id, err);
            return;
        }
    };

    // Tracked before sending so a fast acknowledgement always finds its entry.
    let now = shared.now();
    let entry =
        RelayEntry::new(sequence, peer_id, address, message.channel, datagram.clone(), now);
    shared.outstanding.track(entry);
    shared.send_raw(Some(peer_id), address, &datagram);
}

fn send_control(shared: &Shared, message: &Message, address: SocketAddr) {
    let mut header =
        PacketHeader::new(message.channel, message.target, message.operation, message.peer_id);
    if let Some(sequence) = message.sequence {
        header = header.with_sequence(sequence);
    }
    let peer_id = if shared.is_server() {
        shared.registry.lookup(&address)
    } else {
        Some(SERVER_PEER_ID)
    };
    send_encoded(shared, peer_id, address, &header, &message.payload);
}

fn send_encoded(
    shared: &Shared,
    peer_id: Option<PeerId>,
    address: SocketAddr,
    header: &PacketHeader,
    payload: &[u8],
) {
    let mut stream = match shared.streams.acquire() {
        Ok(stream) => stream,
        Err(_) => return,
    };
    if let Err(err) = FramingEncoder::encode_datagram(&mut stream, header, payload) {
        error!("Error encoding {:?} datagram to {}: {}", header.operation, address, err);
        return;
    }
    shared.send_raw(peer_id, address, stream.as_slice());
}

fn service_timers(shared: &Shared, now: Instant) {
    if let Some(client) = &shared.client {
        client_timers(shared, client, now);
        flush_pending(shared);
    }
    resend_due(shared, now);
    if shared.is_server() {
        expire_idle_peers(shared, now);
    }
    shared.diagnostics.tick(now);
}

/// Handshakes until connected, then pings.
///
/// Decisions are taken under the client lock; sending and emitting happen after it is
/// released.
fn client_timers(shared: &Shared, client: &Mutex<ClientState>, now: Instant) {
    let mut state = client.lock();
    if state.disconnected {
        return;
    }
    let server = state.server;
    let interval = if state.peer_id.is_some() {
        shared.config.ping_interval
    } else {
        shared.config.handshake_interval
    };
    let due = state.last_ping.map_or(true, |at| now.saturating_duration_since(at) >= interval);
    let ping = due.then(|| {
        state.last_ping = Some(now);
        let request =
            ConnectRequest { session_token: state.session_token, client_time: shared.seconds(now) };
        (request, state.peer_id.unwrap_or(SERVER_PEER_ID))
    });

    let waited = now.saturating_duration_since(state.started);
    let timed_out = state.peer_id.is_none()
        && !state.timeout_reported
        && waited >= shared.config.handshake_timeout;
    if timed_out {
        state.timeout_reported = true;
    }
    drop(state);

    if let Some((request, local_id)) = ping {
        match request.to_bytes() {
            Ok(bytes) => {
                let header = PacketHeader::new(
                    ChannelKind::Unreliable,
                    Target::Server,
                    Operation::ConnectAndPing,
                    local_id,
                );
                send_encoded(shared, Some(SERVER_PEER_ID), server, &header, &bytes);
            }
            Err(err) => error!("Error encoding handshake: {}", err),
        }
    }
    if timed_out {
        warn!("No handshake reply from {} after {:?}; still retrying", server, waited);
        shared.emit(TransportEvent::HandshakeTimedOut { server });
    }
}

fn flush_pending(shared: &Shared) {
    let pending = match &shared.client {
        Some(client) => {
            let mut state = client.lock();
            if state.connected_id().is_none() || state.pending.is_empty() {
                return;
            }
            std::mem::take(&mut state.pending)
        }
        None => return,
    };
    for message in pending {
        dispatch(shared, message);
    }
}

fn resend_due(shared: &Shared, now: Instant) {
    let resend_after = shared.diagnostics.resend_after(shared.config.retry_interval);
    let due = shared.outstanding.collect_due(now, resend_after, shared.config.max_retry_attempts);

    for entry in due.resend {
        shared.diagnostics.record_retransmission();
        shared.registry.record_retransmission(entry.peer_id);
        shared.send_raw(Some(entry.peer_id), entry.address, &entry.datagram);
    }
    for entry in due.abandoned {
        shared.diagnostics.record_abandoned();
        shared.registry.record_lost(entry.peer_id);
        let err = ErrorKind::DeliveryAbandoned { peer_id: entry.peer_id, sequence: entry.sequence };
        warn!("{} after {} attempts", err, entry.attempts);
        shared.emit(TransportEvent::DeliveryAbandoned {
            peer_id: entry.peer_id,
            sequence: entry.sequence,
            channel: entry.channel,
        });
    }
}

fn expire_idle_peers(shared: &Shared, now: Instant) {
    let timeout = shared.config.idle_connection_timeout;
    for peer_id in shared.registry.idle_peers(now, timeout) {
        let Some(record) = shared.registry.unregister(peer_id) else {
            continue;
        };
        shared.outstanding.remove_peer(peer_id);
        send_control(shared, &Message::disconnect(record.address, SERVER_PEER_ID), record.address);
        info!("Peer {} at {} timed out", peer_id, record.address);
        shared.emit(TransportEvent::PeerDisconnected {
            peer_id,
            address: record.address,
            reason: DisconnectReason::TimedOut,
        });
    }
}
