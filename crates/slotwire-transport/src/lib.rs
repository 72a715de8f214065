//! Signaling slot abstraction.
//!
//! A slot is the only channel between two slotwire endpoints: a single
//! mutable string value that can be overwritten and observed. Writes are
//! bounded by a hard size ceiling, observers only ever see the latest value,
//! and intermediate values may be coalesced away.
//!
//! This is the lowest layer of slotwire. Everything else builds on top of
//! the [`SlotLink`] type provided here.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::MemorySlot;
pub use traits::{slot_feed, SlotFeed, SlotLink, SlotWatcher, SlotWriter, DEFAULT_MAX_SLOT_BYTES};
