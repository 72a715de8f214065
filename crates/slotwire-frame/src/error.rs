/// Errors that can occur during frame encoding, parsing and reassembly.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not follow the wire grammar, or contradicts frames
    /// already seen for the same message.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A fully reassembled message could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A frame would exceed the slot's hard per-write ceiling.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The encoded message exceeds the configured maximum.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The message could not be serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
