//! Text framing, fragmentation and reassembly for signaling slots.
//!
//! Every slot write is one frame. A message is serialized to JSON, encoded
//! with unpadded base64url so it only uses characters that are legal inside
//! a slot value, and split into chunks that fit under the slot's hard size
//! ceiling together with their frame header:
//!
//! ```text
//! INIT:<secret>
//! ACK-INIT:<secret>
//! MSG:[<secret>:]<REQ|RES>:<id>:<index>/<total>:<chunkPayload>
//! ACK:[<secret>:]<id>:<index>
//! ```
//!
//! The receiving side feeds chunks into a [`ReassemblyBuffer`], which
//! reports completion once every index of a message has been seen.

pub mod codec;
pub mod error;
pub mod kind;
pub mod reassembly;
pub mod wire;

pub use codec::{
    decode_message, encode_message, fragment, split_chunks, FrameConfig,
    DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_SLOT_BYTES, MIN_FRAME_OVERHEAD,
};
pub use error::{FrameError, Result};
pub use kind::MessageKind;
pub use reassembly::{Reassembly, ReassemblyBuffer};
pub use wire::{parse_frame, validate_id, validate_secret, AckFrame, ChunkFrame, Frame};
