/// Errors that can occur in slot transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The value exceeds the slot's hard per-write ceiling.
    #[error("slot value too large ({size} bytes, max {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// The slot has no remaining writer; no further edges will arrive.
    #[error("slot closed")]
    Closed,

    /// No slot link is registered for the destination.
    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    /// The host environment rejected the write.
    #[error("slot write rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
