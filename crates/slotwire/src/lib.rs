//! Reliable request/response messaging over single-value signaling slots.
//!
//! A signaling slot is a shared register holding one short text value that
//! writers overwrite and observers watch. slotwire turns a pair of slots into
//! a dependable channel: JSON messages are chunked to fit the slot, every
//! chunk is acknowledged, requests are correlated with their responses and
//! time out, and an optional session secret isolates a conversation from
//! other writers on the same slot.
//!
//! # Crate Structure
//!
//! - [`transport`]: slot interfaces and an in-memory slot
//! - [`frame`]: wire grammar, payload encoding, chunking and reassembly
//! - [`peer`]: sessions, handshake, dispatch and the destination multiplexer
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use slotwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use slotwire_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use slotwire_peer::*;
}
