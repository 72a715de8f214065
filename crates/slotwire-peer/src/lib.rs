//! Reliable request/response sessions over signaling slots.
//!
//! A signaling slot holds one short text value; writers overwrite it and
//! observers only ever see the latest value. This crate builds a
//! request/response protocol on top: messages are split into chunks, each
//! chunk is acknowledged before the next is written, requests to one
//! destination go out one at a time in FIFO order, and every request has a
//! deadline. An optional handshake tags all frames with a session secret
//! so unrelated parties sharing a slot ignore each other.
//!
//! ```no_run
//! use serde_json::{json, Value};
//! use slotwire_peer::{MultiplexerBuilder, PeerConfig, RequestContext};
//! use slotwire_transport::{MemorySlot, DEFAULT_MAX_SLOT_BYTES};
//!
//! # async fn demo() -> slotwire_peer::Result<()> {
//! let (left, right) = MemorySlot::pair(DEFAULT_MAX_SLOT_BYTES);
//!
//! let _server = MultiplexerBuilder::new(PeerConfig::default())
//!     .on_message(|msg: Value, _ctx: RequestContext| async move { Some(msg) })
//!     .connect(right)
//!     .await?;
//! let client = MultiplexerBuilder::new(PeerConfig::default()).connect(left).await?;
//!
//! assert_eq!(client.send(json!({"op": "ping"})).await?, json!({"op": "ping"}));
//! # Ok(())
//! # }
//! ```

mod channel;
mod correlation;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod ids;
pub mod multiplexer;
pub mod peer;
mod session;

pub use dispatch::{BoxFuture, Handler, HandlerRegistry, RequestContext};
pub use error::{PeerError, Result};
pub use handshake::{HandshakeConfig, HandshakeMode};
pub use ids::{generate_secret, IdGenerator, SequentialIds, UuidIds};
pub use multiplexer::{
    DestinationId, FailureHook, LinkRegistry, LinkTable, MultiplexerBuilder, MultiplexerHandle,
};
pub use peer::{
    Peer, PeerConfig, DEFAULT_REASSEMBLY_TTL, DEFAULT_REQUEST_TIMEOUT, PEER_DESTINATION,
};
