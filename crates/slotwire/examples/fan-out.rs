//! One multiplexer talking to several destinations at once.
//!
//! Each worker answers after a different delay; responses arrive in
//! completion order because destinations never wait on each other.
//!
//! Run with:
//!   cargo run --example fan-out

use std::time::Duration;

use serde_json::{json, Value};
use slotwire::peer::{LinkTable, MultiplexerBuilder, PeerConfig, RequestContext};
use slotwire::transport::{MemorySlot, DEFAULT_MAX_SLOT_BYTES};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut links = LinkTable::new();
    let mut workers = Vec::new();

    for (name, delay_ms) in [("slow", 300u64), ("medium", 150), ("fast", 10)] {
        let outbound = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
        let inbound = MemorySlot::new(DEFAULT_MAX_SLOT_BYTES);
        links = links.with(name, outbound.link_with(&inbound));

        let worker = MultiplexerBuilder::new(PeerConfig::default())
            .on_message(move |msg: Value, _ctx: RequestContext| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Some(json!({"worker": name, "input": msg}))
            })
            .connect(inbound.link_with(&outbound))
            .await?;
        workers.push(worker);
    }

    let hub = MultiplexerBuilder::new(PeerConfig::default()).spawn(links)?;
    let mut pending = tokio::task::JoinSet::new();
    for name in ["slow", "medium", "fast"] {
        let hub = hub.clone();
        pending.spawn(async move { hub.send(name, json!({"job": name})).await });
    }

    while let Some(result) = pending.join_next().await {
        println!("{}", result??);
    }

    hub.shutdown().await?;
    Ok(())
}
