//! Two endpoints in one process, connected by in-memory slots.
//!
//! Run with:
//!   cargo run --example echo-pair

use serde_json::{json, Value};
use slotwire::peer::{HandshakeConfig, MultiplexerBuilder, PeerConfig, RequestContext};
use slotwire::transport::MemorySlot;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Small slots force every message through several chunks.
    let max_slot_bytes = 160;
    let to_server = MemorySlot::new(max_slot_bytes);
    let to_client = MemorySlot::new(max_slot_bytes);
    let config = PeerConfig::default().with_max_slot_bytes(max_slot_bytes);

    let _server = MultiplexerBuilder::new(config.clone().with_handshake(HandshakeConfig::responder()))
        .on_message(|msg: Value, ctx: RequestContext| async move {
            eprintln!("server: request {} from {}", ctx.request_id(), ctx.destination());
            Some(json!({"echo": msg}))
        })
        .connect(to_client.link_with(&to_server))
        .await?;

    let client = MultiplexerBuilder::new(config.with_handshake(HandshakeConfig::initiator()))
        .connect(to_server.link_with(&to_client))
        .await?;

    let response = client
        .send(json!({"op": "greet", "text": "hello over a very small slot"}))
        .await?;
    println!("{response}");

    eprintln!(
        "{} frames client->server, {} frames server->client",
        to_server.history().len(),
        to_client.history().len()
    );
    client.close().await?;
    Ok(())
}
