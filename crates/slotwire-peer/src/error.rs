use std::time::Duration;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Slot-level error.
    #[error("transport error: {0}")]
    Transport(#[from] slotwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] slotwire_frame::FrameError),

    /// No response arrived within the request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was cancelled before it completed.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Session secret negotiation failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The multiplexer is no longer running.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;
