//! Message kinds carried by `MSG` frames.

use std::fmt;

/// Direction of a fragmented message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A request awaiting a response.
    Request,
    /// The response to a request, sent under the request's id.
    Response,
}

impl MessageKind {
    /// Wire tag for this kind.
    pub const fn tag(self) -> &'static str {
        match self {
            MessageKind::Request => "REQ",
            MessageKind::Response => "RES",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "REQ" => Some(MessageKind::Request),
            "RES" => Some(MessageKind::Response),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
