//! Simple greeting server using Tidewire.
//!
//! Run:
//! - cargo run -p tidewire --example server
//! - cargo run -p tidewire --example server -- 127.0.0.1:7777

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use tidewire::prelude::*;
use tracing_subscriber::EnvFilter;

/// Call id of the greeting handler; the client example uses the same id.
const GREET: u32 = 1;

fn parse_bind_addr() -> Option<SocketAddr> {
    let mut args = env::args().skip(1);
    args.next().and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(
        GREET,
        |delivery: &Delivery, payload: &mut BinaryStream, reply: &mut BinaryStream| {
            let name = payload.read_string()?;
            println!("[greet] peer={} name=\"{}\"", delivery.peer_id, name);
            HandlerRegistry::write_call_id(reply, GREET)?;
            reply.write_string(&format!("hello {}, you are peer {}", name, delivery.peer_id))
        },
    );

    let bind_addr = parse_bind_addr().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 5055)));
    let server = Transport::bind_server(Config::bound_to(bind_addr), registry)?;
    println!("Tidewire server listening on {}", server.local_addr());

    let events = server.events();
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(TransportEvent::PeerConnected { peer_id, address }) => {
                println!("[connect] peer={} address={}", peer_id, address);
            }
            Ok(TransportEvent::PeerDisconnected { peer_id, address, reason }) => {
                println!("[disconnect] peer={} address={} reason={:?}", peer_id, address, reason);
            }
            Ok(other) => println!("[event] {:?}", other),
            Err(_) => {
                let stats = server.diagnostics();
                println!(
                    "[stats] peers={} sent={} received={} retransmissions={} rtt={:?}",
                    server.peer_count(),
                    stats.packets_sent,
                    stats.packets_received,
                    stats.retransmissions,
                    stats.rtt
                );
            }
        }
    }
}
