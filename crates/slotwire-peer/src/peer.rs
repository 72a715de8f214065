use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use slotwire_frame::FrameConfig;

use crate::error::Result;
use crate::handshake::HandshakeConfig;
use crate::multiplexer::{DestinationId, MultiplexerBuilder, MultiplexerHandle};

/// Destination name used by [`MultiplexerBuilder::connect`].
pub const PEER_DESTINATION: &str = "peer";

/// Default time a request may wait for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default lifetime of a partially received message.
pub const DEFAULT_REASSEMBLY_TTL: Duration = Duration::from_secs(60);

/// Runtime settings shared by every destination of a multiplexer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Deadline for each request, counted from the moment it is sent.
    pub request_timeout: Duration,
    /// Evict partial inbound messages older than this. `None` keeps them forever;
    /// completion markers then expire after `request_timeout`.
    pub reassembly_ttl: Option<Duration>,
    /// Chunking limits. The slot ceiling is further capped by the slot writer.
    pub frame: FrameConfig,
    pub handshake: HandshakeConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reassembly_ttl: Some(DEFAULT_REASSEMBLY_TTL),
            frame: FrameConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl PeerConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reassembly_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.reassembly_ttl = ttl;
        self
    }

    pub fn with_max_slot_bytes(mut self, max_slot_bytes: usize) -> Self {
        self.frame.max_slot_bytes = max_slot_bytes;
        self
    }

    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }
}

/// A multiplexer bound to a single destination.
///
/// Created by [`MultiplexerBuilder::connect`]. Dropping every clone of the
/// underlying handle stops the session.
#[derive(Clone)]
pub struct Peer {
    handle: MultiplexerHandle,
    destination: DestinationId,
}

impl Peer {
    pub(crate) fn new(handle: MultiplexerHandle, destination: DestinationId) -> Self {
        Self {
            handle,
            destination,
        }
    }

    /// Start building a peer.
    pub fn builder(config: PeerConfig) -> MultiplexerBuilder {
        MultiplexerBuilder::new(config)
    }

    /// Send a request and wait for its response.
    pub async fn send(&self, message: Value) -> Result<Value> {
        self.handle.send(self.destination.clone(), message).await
    }

    /// Typed wrapper around [`Peer::send`].
    pub async fn request<T, R>(&self, request: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        self.handle.request(self.destination.clone(), request).await
    }

    pub fn destination(&self) -> &DestinationId {
        &self.destination
    }

    pub fn handle(&self) -> &MultiplexerHandle {
        &self.handle
    }

    /// Cancel everything pending and stop the session.
    pub async fn close(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("destination", &self.destination)
            .field("handle", &self.handle)
            .finish()
    }
}
