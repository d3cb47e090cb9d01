//! Simple client that greets a Tidewire server and prints replies.
//!
//! Run the server first:
//! - cargo run -p tidewire --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p tidewire --example client -- 127.0.0.1:7777
//! - cargo run -p tidewire --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 greetings, 200ms apart)

use std::{env, net::SocketAddr, sync::Arc, thread, time::Duration};

use tidewire::prelude::*;
use tracing_subscriber::EnvFilter;

const GREET: u32 = 1;

fn print_reply(
    _: &Delivery,
    payload: &mut BinaryStream,
    _: &mut BinaryStream,
) -> tidewire::Result<()> {
    println!("[reply] {}", payload.read_string()?);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr =
        args.next().unwrap_or_else(|| "127.0.0.1:5055".to_string()).parse()?;
    let count: usize = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args.next().unwrap_or_else(|| "300".into()).parse().unwrap_or(300);

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(GREET, print_reply);

    let config = Config::bound_to(SocketAddr::from(([127, 0, 0, 1], 0)));
    let client = Transport::connect(config, server_addr, registry)?;
    println!("Tidewire client bound to {} -> connecting to {}", client.local_addr(), server_addr);

    let events = client.events();
    match events.recv_timeout(Duration::from_secs(10))? {
        TransportEvent::Connected { peer_id } => println!("[connect] assigned peer {}", peer_id),
        other => return Err(format!("unexpected event {:?}", other).into()),
    }

    for i in 0..count {
        let mut stream = client.acquire_stream()?;
        HandlerRegistry::write_call_id(&mut stream, GREET)?;
        stream.write_string(&format!("client #{}", i))?;
        client.send_stream(&stream, ChannelKind::ReliableOrdered, Target::Server, 0)?;
        drop(stream);

        thread::sleep(Duration::from_millis(interval_ms));
    }

    let stats = client.diagnostics();
    println!(
        "[stats] sent={} received={} rtt={:?} clock_offset={:?}",
        stats.packets_sent, stats.packets_received, stats.rtt, stats.clock_offset
    );
    if let Some(server) = client.peer_statistics(0) {
        println!(
            "[stats] server link: retransmitted={:.1}% lost={:.1}%",
            server.retransmission_rate() * 100.0,
            server.packet_loss_rate() * 100.0
        );
    }
    client.close();
    Ok(())
}
