//! Optional session-secret negotiation.
//!
//! The initiator writes `INIT:<secret>` and waits for `ACK-INIT:<secret>`.
//! The responder ignores everything until the first INIT, adopts its secret,
//! and echoes it back. Once established, every MSG and ACK frame must carry
//! the secret; frames with a missing or different secret are dropped without
//! an acknowledgement, which keeps unrelated parties on the same slot apart.

use std::fmt;
use std::time::Duration;

use slotwire_frame::{validate_secret, Frame};
use tokio::time::Instant;

use crate::error::{PeerError, Result};
use crate::ids::generate_secret;

/// Role this endpoint plays in the secret exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandshakeMode {
    /// No handshake; frames carry no secret.
    #[default]
    Disabled,
    /// Send INIT and wait for ACK-INIT before sending requests.
    Initiator,
    /// Wait for INIT and adopt the offered secret.
    Responder,
}

/// Configuration for session-secret negotiation.
#[derive(Clone)]
pub struct HandshakeConfig {
    pub mode: HandshakeMode,
    /// How long an initiator waits for ACK-INIT. Default: 5 seconds.
    pub timeout: Duration,
    /// Fixed secret for the initiator. A fresh random secret is used when unset.
    /// Treated as credential material and redacted in debug output.
    pub secret: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            mode: HandshakeMode::Disabled,
            timeout: Duration::from_secs(5),
            secret: None,
        }
    }
}

impl HandshakeConfig {
    pub fn initiator() -> Self {
        Self {
            mode: HandshakeMode::Initiator,
            ..Self::default()
        }
    }

    pub fn responder() -> Self {
        Self {
            mode: HandshakeMode::Responder,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Reject a fixed secret that cannot travel inside a frame.
    pub fn validate(&self) -> Result<()> {
        if let Some(secret) = &self.secret {
            validate_secret(secret).map_err(|err| PeerError::HandshakeFailed(err.to_string()))?;
        }
        Ok(())
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HandshakeConfig");
        dbg.field("mode", &self.mode).field("timeout", &self.timeout);
        if let Some(secret) = &self.secret {
            dbg.field("secret", &Redacted(secret));
        } else {
            dbg.field("secret", &Option::<String>::None);
        }
        dbg.finish()
    }
}

struct Redacted<'a>(&'a str);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted:{} bytes>", self.0.len())
    }
}

enum GateState {
    /// Handshake disabled; every plain frame is admitted.
    Open,
    /// Initiator that has not offered a secret yet.
    Idle,
    /// Initiator waiting for ACK-INIT.
    Offered { secret: String, deadline: Instant },
    /// Responder waiting for the first INIT.
    AwaitingInit,
    Established { secret: String },
}

/// What the channel should do with an inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Hand the frame to the protocol engine.
    Process,
    /// Drop the frame silently.
    Ignore,
    /// The frame was part of the secret exchange; write `reply` if present.
    Handshake { reply: Option<String> },
}

/// Per-destination handshake state machine.
///
/// An initiator draws its secret once and repeats it on every offer, so a
/// responder that adopted an earlier INIT still matches a later one.
pub(crate) struct SecretGate {
    config: HandshakeConfig,
    state: GateState,
    offered: Option<String>,
}

impl SecretGate {
    pub(crate) fn new(config: HandshakeConfig) -> Self {
        let state = match config.mode {
            HandshakeMode::Disabled => GateState::Open,
            HandshakeMode::Initiator => GateState::Idle,
            HandshakeMode::Responder => GateState::AwaitingInit,
        };
        Self {
            config,
            state,
            offered: None,
        }
    }

    /// True when requests and responses may be sent.
    pub(crate) fn is_open(&self) -> bool {
        matches!(self.state, GateState::Open | GateState::Established { .. })
    }

    /// True when frames are matched against a session secret.
    pub(crate) fn filters_by_secret(&self) -> bool {
        self.config.mode != HandshakeMode::Disabled
    }

    /// Secret to embed in outgoing frames.
    pub(crate) fn secret(&self) -> Option<&str> {
        match &self.state {
            GateState::Established { secret } => Some(secret),
            _ => None,
        }
    }

    /// Start an initiator handshake if none is running.
    ///
    /// Returns the INIT frame to write.
    pub(crate) fn offer(&mut self, now: Instant) -> Option<String> {
        if !matches!(self.state, GateState::Idle) {
            return None;
        }
        if self.offered.is_none() {
            self.offered = Some(self.config.secret.clone().unwrap_or_else(generate_secret));
        }
        let secret = self.offered.clone().unwrap_or_default();
        let frame = Frame::Init {
            secret: secret.clone(),
        }
        .encode();
        self.state = GateState::Offered {
            secret,
            deadline: now + self.config.timeout,
        };
        Some(frame)
    }

    /// Abandon a pending offer so the next send starts over.
    pub(crate) fn reset(&mut self) {
        if matches!(self.state, GateState::Offered { .. }) {
            self.state = GateState::Idle;
        }
    }

    /// When the pending offer expires.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        match &self.state {
            GateState::Offered { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Expire a pending offer. Returns `true` if it timed out.
    pub(crate) fn expire(&mut self, now: Instant) -> bool {
        match &self.state {
            GateState::Offered { deadline, .. } if *deadline <= now => {
                self.state = GateState::Idle;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Classify an inbound frame, updating handshake state as needed.
    pub(crate) fn admit(&mut self, frame: &Frame) -> Admission {
        match (&self.state, frame) {
            (GateState::Open, Frame::Chunk(_) | Frame::Ack(_)) if frame.secret().is_none() => {
                Admission::Process
            }
            (GateState::Open, _) => Admission::Ignore,

            (GateState::AwaitingInit, Frame::Init { secret }) => {
                if validate_secret(secret).is_err() {
                    return Admission::Ignore;
                }
                tracing::debug!(secret_len = secret.len(), "session secret adopted");
                let reply = Frame::InitAck {
                    secret: secret.clone(),
                }
                .encode();
                self.state = GateState::Established {
                    secret: secret.clone(),
                };
                Admission::Handshake { reply: Some(reply) }
            }

            (GateState::Offered { secret: offered, .. }, Frame::InitAck { secret })
                if offered == secret =>
            {
                tracing::debug!(secret_len = secret.len(), "session secret established");
                self.state = GateState::Established {
                    secret: secret.clone(),
                };
                Admission::Handshake { reply: None }
            }

            // The offer expired but the responder answered it after all.
            (GateState::Idle, Frame::InitAck { secret })
                if self.offered.as_deref() == Some(secret.as_str()) =>
            {
                tracing::debug!(secret_len = secret.len(), "late ACK-INIT accepted");
                self.state = GateState::Established {
                    secret: secret.clone(),
                };
                Admission::Handshake { reply: None }
            }

            // A responder re-acknowledges a repeated INIT from its own initiator.
            (GateState::Established { secret: ours }, Frame::Init { secret })
                if self.config.mode == HandshakeMode::Responder && ours == secret =>
            {
                Admission::Handshake {
                    reply: Some(Frame::InitAck { secret: ours.clone() }.encode()),
                }
            }

            (GateState::Established { secret: ours }, Frame::Chunk(_) | Frame::Ack(_))
                if frame.secret() == Some(ours.as_str()) =>
            {
                Admission::Process
            }

            _ => Admission::Ignore,
        }
    }
}
