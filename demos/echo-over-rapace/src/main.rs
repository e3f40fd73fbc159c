//! Two peers, one connection: the host exposes `ping.echo` and
//! `sys.tick`; the guest calls the former and subscribes to the latter.

mod channels;

use std::sync::Arc;

use rapace::{ChannelServerConfig, Connection};
use rapace_core::Value;
use rapace_transport::MemTransport;

use channels::{Ping, Sys};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let (host_transport, guest_transport) = MemTransport::pair();
    let (host, guest) = tokio::join!(
        Connection::connect(Arc::new(host_transport), Value::Text("host".into()), ChannelServerConfig::default()),
        Connection::connect(Arc::new(guest_transport), Value::Text("guest".into()), ChannelServerConfig::default()),
    );
    let host = host.expect("host side of the handshake failed");
    let guest = guest.expect("guest side of the handshake failed");

    host.server.register_channel("ping", Arc::new(Ping));
    host.server.register_channel("sys", Arc::new(Sys));

    let reply = guest
        .client
        .call("ping", "echo", Value::Text("hello from the guest".into()), rapace::never_cancelled())
        .await
        .expect("echo call failed");
    tracing::info!(?reply, "ping.echo replied");

    let mut ticks = guest.client.listen("sys", "tick", Value::Absent);
    for _ in 0..5 {
        match ticks.next().await {
            Some(value) => tracing::info!(?value, "sys.tick fired"),
            None => break,
        }
    }
    drop(ticks); // sends Unsubscribe

    host.dispose();
    guest.dispose();
}
