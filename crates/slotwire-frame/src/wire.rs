use std::fmt;

use crate::error::{FrameError, Result};
use crate::kind::MessageKind;

/// Frame prefix for fragmented message chunks.
pub const MSG: &str = "MSG";
/// Frame prefix for chunk acknowledgements.
pub const ACK: &str = "ACK";
/// Frame prefix for the handshake offer.
pub const INIT: &str = "INIT";
/// Frame prefix for the handshake acknowledgement.
pub const ACK_INIT: &str = "ACK-INIT";

/// Maximum message id length in bytes.
pub const MAX_ID_LEN: usize = 128;
/// Maximum session secret length in bytes.
pub const MAX_SECRET_LEN: usize = 64;

/// One fragment of a fragmented message.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Session secret, present only on handshake-gated links.
    pub secret: Option<String>,
    /// Whether the chunk belongs to a request or a response.
    pub kind: MessageKind,
    /// Message id shared by all chunks of the message.
    pub id: String,
    /// Zero-based position of this chunk.
    pub index: usize,
    /// Number of chunks in the message.
    pub total: usize,
    /// Transport-encoded payload fragment.
    pub payload: String,
}

/// Acknowledgement of a single chunk.
#[derive(Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// Session secret, present only on handshake-gated links.
    pub secret: Option<String>,
    /// Id of the acknowledged message.
    pub id: String,
    /// Index of the acknowledged chunk.
    pub index: usize,
}

/// A single slot value.
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake offer carrying the initiator's session secret.
    Init { secret: String },
    /// Handshake acknowledgement echoing the secret.
    InitAck { secret: String },
    /// A message chunk.
    Chunk(ChunkFrame),
    /// A chunk acknowledgement.
    Ack(AckFrame),
}

impl Frame {
    /// Session secret carried by the frame, if any.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Frame::Init { secret } | Frame::InitAck { secret } => Some(secret),
            Frame::Chunk(chunk) => chunk.secret.as_deref(),
            Frame::Ack(ack) => ack.secret.as_deref(),
        }
    }

    /// Render the frame as a slot value.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl ChunkFrame {
    /// Acknowledgement for this chunk.
    pub fn ack(&self) -> AckFrame {
        AckFrame {
            secret: self.secret.clone(),
            id: self.id.clone(),
            index: self.index,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Init { secret } => write!(f, "{INIT}:{secret}"),
            Frame::InitAck { secret } => write!(f, "{ACK_INIT}:{secret}"),
            Frame::Chunk(chunk) => fmt::Display::fmt(chunk, f),
            Frame::Ack(ack) => fmt::Display::fmt(ack, f),
        }
    }
}

impl fmt::Display for ChunkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MSG}:")?;
        if let Some(secret) = &self.secret {
            write!(f, "{secret}:")?;
        }
        write!(
            f,
            "{}:{}:{}/{}:{}",
            self.kind, self.id, self.index, self.total, self.payload
        )
    }
}

impl fmt::Display for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ACK}:")?;
        if let Some(secret) = &self.secret {
            write!(f, "{secret}:")?;
        }
        write!(f, "{}:{}", self.id, self.index)
    }
}

struct Redacted<'a>(Option<&'a str>);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(secret) => write!(f, "<redacted:{} bytes>", secret.len()),
            None => f.write_str("None"),
        }
    }
}

impl fmt::Debug for ChunkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkFrame")
            .field("secret", &Redacted(self.secret.as_deref()))
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("index", &self.index)
            .field("total", &self.total)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Debug for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckFrame")
            .field("secret", &Redacted(self.secret.as_deref()))
            .field("id", &self.id)
            .field("index", &self.index)
            .finish()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Init { secret } => f
                .debug_struct("Init")
                .field("secret", &Redacted(Some(secret)))
                .finish(),
            Frame::InitAck { secret } => f
                .debug_struct("InitAck")
                .field("secret", &Redacted(Some(secret)))
                .finish(),
            Frame::Chunk(chunk) => fmt::Debug::fmt(chunk, f),
            Frame::Ack(ack) => fmt::Debug::fmt(ack, f),
        }
    }
}

/// Parse one slot value into a frame.
///
/// Values that are not slotwire frames (including the empty initial value)
/// are reported as [`FrameError::ProtocolViolation`]; callers sharing a slot
/// with unrelated writers are expected to ignore them.
pub fn parse_frame(value: &str) -> Result<Frame> {
    if let Some(secret) = value.strip_prefix("ACK-INIT:") {
        validate_secret(secret)?;
        return Ok(Frame::InitAck {
            secret: secret.to_string(),
        });
    }
    if let Some(secret) = value.strip_prefix("INIT:") {
        validate_secret(secret)?;
        return Ok(Frame::Init {
            secret: secret.to_string(),
        });
    }
    if let Some(rest) = value.strip_prefix("MSG:") {
        return parse_chunk(rest).map(Frame::Chunk);
    }
    if let Some(rest) = value.strip_prefix("ACK:") {
        return parse_ack(rest).map(Frame::Ack);
    }

    Err(FrameError::ProtocolViolation(format!(
        "unrecognized frame ({} bytes)",
        value.len()
    )))
}

fn parse_chunk(rest: &str) -> Result<ChunkFrame> {
    let fields: Vec<&str> = rest.split(':').collect();
    let (secret, fields) = match fields.len() {
        4 => (None, &fields[..]),
        5 => (Some(fields[0]), &fields[1..]),
        n => {
            return Err(FrameError::ProtocolViolation(format!(
                "MSG frame has {n} fields (expected 4 or 5)"
            )))
        }
    };

    if let Some(secret) = secret {
        validate_secret(secret)?;
    }
    let kind = MessageKind::from_tag(fields[0]).ok_or_else(|| {
        FrameError::ProtocolViolation(format!("unknown message kind '{}'", fields[0]))
    })?;
    validate_id(fields[1])?;
    let (index, total) = parse_position(fields[2])?;
    let payload = fields[3];
    if !is_transport_safe(payload) {
        return Err(FrameError::ProtocolViolation(
            "chunk payload contains characters outside the transport alphabet".to_string(),
        ));
    }

    Ok(ChunkFrame {
        secret: secret.map(str::to_string),
        kind,
        id: fields[1].to_string(),
        index,
        total,
        payload: payload.to_string(),
    })
}

fn parse_ack(rest: &str) -> Result<AckFrame> {
    let fields: Vec<&str> = rest.split(':').collect();
    let (secret, id, index) = match fields.as_slice() {
        [id, index] => (None, *id, *index),
        [secret, id, index] => (Some(*secret), *id, *index),
        _ => {
            return Err(FrameError::ProtocolViolation(format!(
                "ACK frame has {} fields (expected 2 or 3)",
                fields.len()
            )))
        }
    };

    if let Some(secret) = secret {
        validate_secret(secret)?;
    }
    validate_id(id)?;

    Ok(AckFrame {
        secret: secret.map(str::to_string),
        id: id.to_string(),
        index: parse_number(index)?,
    })
}

fn parse_position(field: &str) -> Result<(usize, usize)> {
    let (index, total) = field.split_once('/').ok_or_else(|| {
        FrameError::ProtocolViolation(format!("invalid chunk position '{field}'"))
    })?;
    let index = parse_number(index)?;
    let total = parse_number(total)?;

    if total == 0 {
        return Err(FrameError::ProtocolViolation(
            "chunk total must be at least 1".to_string(),
        ));
    }
    if index >= total {
        return Err(FrameError::ProtocolViolation(format!(
            "chunk index {index} out of range for total {total}"
        )));
    }
    Ok((index, total))
}

fn parse_number(field: &str) -> Result<usize> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::ProtocolViolation(format!(
            "invalid number '{field}'"
        )));
    }
    field
        .parse()
        .map_err(|_| FrameError::ProtocolViolation(format!("number out of range '{field}'")))
}

/// Validate a message id: 1..=128 bytes, no `:` and no whitespace.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(FrameError::ProtocolViolation(format!(
            "invalid message id length: {}",
            id.len()
        )));
    }
    if id
        .bytes()
        .any(|b| b == b':' || b == b'/' || !b.is_ascii_graphic())
    {
        return Err(FrameError::ProtocolViolation(
            "message id contains a reserved character".to_string(),
        ));
    }
    Ok(())
}

/// Validate a session secret: 1..=64 characters from the transport alphabet.
pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.is_empty() || secret.len() > MAX_SECRET_LEN {
        return Err(FrameError::ProtocolViolation(format!(
            "invalid secret length: {}",
            secret.len()
        )));
    }
    if !is_transport_safe(secret) {
        return Err(FrameError::ProtocolViolation(
            "secret contains characters outside the transport alphabet".to_string(),
        ));
    }
    Ok(())
}

/// True if every byte is a letter, a digit, `-` or `_`.
pub fn is_transport_safe(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
