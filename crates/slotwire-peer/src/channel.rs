//! Protocol engine for one destination.
//!
//! A `Channel` owns everything that talks to one peer: the handshake gate,
//! the outgoing request queue, response transfers in progress and the
//! inbound reassembly buffer. It never blocks and never reads the clock;
//! the caller feeds it slot values, handler results and ticks, each with
//! the current instant.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use slotwire_frame::{
    fragment, parse_frame, AckFrame, ChunkFrame, Frame, FrameError, MessageKind, Reassembly,
    ReassemblyBuffer,
};
use slotwire_transport::SlotWriter;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::correlation::{CorrelationTable, Responder};
use crate::error::{PeerError, Result};
use crate::handshake::{Admission, SecretGate};
use crate::ids::IdGenerator;
use crate::multiplexer::DestinationId;
use crate::peer::PeerConfig;
use crate::session::{OutgoingSession, QueuedRequest, Step, Transfer};

/// A fully reassembled request awaiting a handler.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InboundRequest {
    pub(crate) id: String,
    pub(crate) message: Value,
}

/// Work produced by one inbound slot value.
#[derive(Debug, Default)]
pub(crate) struct Inbound {
    pub(crate) requests: Vec<InboundRequest>,
    pub(crate) failures: Vec<PeerError>,
}

pub(crate) struct Channel {
    destination: DestinationId,
    writer: Arc<dyn SlotWriter>,
    config: PeerConfig,
    ids: Arc<dyn IdGenerator>,
    gate: SecretGate,
    session: OutgoingSession,
    correlation: CorrelationTable,
    responses: HashMap<String, Transfer>,
    inbound: ReassemblyBuffer,
}

impl Channel {
    pub(crate) fn new(
        destination: DestinationId,
        writer: Arc<dyn SlotWriter>,
        mut config: PeerConfig,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        config.frame.max_slot_bytes = config.frame.max_slot_bytes.min(writer.max_value_len());
        Self {
            gate: SecretGate::new(config.handshake.clone()),
            inbound: ReassemblyBuffer::new(&config.frame),
            destination,
            writer,
            config,
            ids,
            session: OutgoingSession::default(),
            correlation: CorrelationTable::default(),
            responses: HashMap::new(),
        }
    }

    /// Offer a session secret if this endpoint initiates the handshake.
    pub(crate) fn start(&mut self, now: Instant) -> Result<()> {
        if let Some(init) = self.gate.offer(now) {
            debug!(destination = %self.destination, "offering session secret");
            if let Err(err) = self.write(&init) {
                self.gate.reset();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Queue a request; it is sent once everything ahead of it has settled.
    pub(crate) fn enqueue(&mut self, message: Value, responder: Responder, now: Instant) {
        self.session.push(QueuedRequest { message, responder });
        if let Err(err) = self.start(now) {
            self.fail_queued(|| {
                PeerError::HandshakeFailed(format!("could not write INIT: {err}"))
            });
            return;
        }
        self.pump(now);
    }

    /// Process one observed value of the inbound slot.
    pub(crate) fn on_signal(&mut self, value: &str, now: Instant) -> Inbound {
        let mut inbound = Inbound::default();
        if value.is_empty() {
            return inbound;
        }

        let frame = match parse_frame(value) {
            Ok(frame) => frame,
            Err(err) => {
                if looks_like_frame(value) && !self.gate.filters_by_secret() {
                    warn!(destination = %self.destination, error = %err, "malformed frame");
                    inbound.failures.push(err.into());
                } else {
                    trace!(destination = %self.destination, len = value.len(), "ignoring foreign slot value");
                }
                return inbound;
            }
        };

        match self.gate.admit(&frame) {
            Admission::Process => {}
            Admission::Ignore => {
                trace!(destination = %self.destination, "ignoring frame outside this session");
                return inbound;
            }
            Admission::Handshake { reply } => {
                if let Some(reply) = reply {
                    if let Err(err) = self.write(&reply) {
                        warn!(destination = %self.destination, error = %err, "could not acknowledge INIT");
                    }
                }
                self.pump(now);
                return inbound;
            }
        }

        match frame {
            Frame::Chunk(chunk) => self.on_chunk(chunk, now, &mut inbound),
            Frame::Ack(ack) => self.on_ack(&ack, now),
            Frame::Init { .. } | Frame::InitAck { .. } => {}
        }
        inbound
    }

    /// Send the response to a previously dispatched request.
    pub(crate) fn respond(&mut self, request_id: &str, response: Value, now: Instant) -> Result<()> {
        if self.responses.contains_key(request_id) {
            debug!(destination = %self.destination, id = %request_id, "response already in progress");
            return Ok(());
        }
        if !self.gate.is_open() {
            return Err(PeerError::HandshakeFailed(
                "session secret not established".to_string(),
            ));
        }

        let frames = self.render(MessageKind::Response, request_id, &response)?;
        let transfer = Transfer::new(request_id.to_string(), frames, now);
        let first = transfer.first_frame().to_string();
        debug!(destination = %self.destination, id = %request_id, "sending response");
        self.responses.insert(request_id.to_string(), transfer);

        if let Err(err) = self.write(&first) {
            self.responses.remove(request_id);
            return Err(err);
        }
        Ok(())
    }

    /// Apply every deadline that has passed by `now`.
    pub(crate) fn on_tick(&mut self, now: Instant) {
        for id in self.correlation.expire(now) {
            warn!(destination = %self.destination, id = %id, "request timed out");
            self.session.finish(&id);
            self.inbound.discard(MessageKind::Response, &id);
        }

        if self.gate.expire(now) {
            let timeout = self.gate.timeout();
            warn!(destination = %self.destination, ?timeout, "handshake timed out");
            self.fail_queued(|| {
                PeerError::HandshakeFailed(format!("no ACK-INIT within {timeout:?}"))
            });
        }

        let timeout = self.config.request_timeout;
        self.responses
            .retain(|_, transfer| now.saturating_duration_since(transfer.started()) < timeout);

        match self.config.reassembly_ttl {
            Some(ttl) => {
                let evicted = self.inbound.evict_stale(now, ttl);
                if evicted > 0 {
                    debug!(destination = %self.destination, evicted, "evicted stale partial messages");
                }
            }
            // Replay markers are still bounded when partial eviction is off.
            None => {
                self.inbound.expire_completed(now, timeout);
            }
        }

        self.pump(now);
    }

    /// Earliest instant at which `on_tick` has work to do.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.config.request_timeout;
        let responses = self
            .responses
            .values()
            .map(|transfer| transfer.started() + timeout);
        let reassembly = match self.config.reassembly_ttl {
            Some(ttl) => self.inbound.oldest().map(|oldest| oldest + ttl),
            None => self.inbound.oldest_completed().map(|done| done + timeout),
        };

        self.correlation
            .next_deadline()
            .into_iter()
            .chain(self.gate.deadline())
            .chain(responses)
            .chain(reassembly)
            .min()
    }

    /// Reject everything pending with `PeerError::Cancelled` and drop all state.
    pub(crate) fn teardown(&mut self, reason: &str) {
        if let Some(id) = self.session.in_flight_id().map(str::to_string) {
            self.session.finish(&id);
        }
        self.correlation
            .reject_all(|| PeerError::Cancelled(reason.to_string()));
        self.fail_queued(|| PeerError::Cancelled(reason.to_string()));
        self.responses.clear();
        self.inbound.clear();
    }

    /// Requests queued or in flight.
    pub(crate) fn pending(&self) -> usize {
        self.session.queued() + self.correlation.len()
    }

    fn pump(&mut self, now: Instant) {
        while self.session.is_idle() && self.gate.is_open() {
            let Some(request) = self.session.pop_next() else {
                return;
            };
            if request.responder.is_closed() {
                debug!(destination = %self.destination, "skipping request abandoned by caller");
                continue;
            }

            let id = self.ids.next_id();
            let frames = match self.render(MessageKind::Request, &id, &request.message) {
                Ok(frames) => frames,
                Err(err) => {
                    let _ = request.responder.send(Err(err));
                    continue;
                }
            };
            debug!(destination = %self.destination, id = %id, chunks = frames.len(), "sending request");

            self.correlation
                .register(id.clone(), now, self.config.request_timeout, request.responder);
            let transfer = Transfer::new(id.clone(), frames, now);
            let first = transfer.first_frame().to_string();
            self.session.begin(transfer);

            if let Err(err) = self.write(&first) {
                self.abort_in_flight(&id, err);
            }
        }
    }

    fn on_chunk(&mut self, chunk: ChunkFrame, now: Instant, inbound: &mut Inbound) {
        let ack = Frame::Ack(chunk.ack()).encode();
        if let Err(err) = self.write(&ack) {
            warn!(destination = %self.destination, id = %chunk.id, error = %err, "could not acknowledge chunk");
        }

        if chunk.kind == MessageKind::Response {
            self.session.outbound_done(&chunk.id);
        }

        match self.inbound.on_chunk(&chunk, now) {
            Ok(Reassembly::Complete(message)) => match chunk.kind {
                MessageKind::Request => {
                    debug!(destination = %self.destination, id = %chunk.id, "request received");
                    inbound.requests.push(InboundRequest {
                        id: chunk.id,
                        message,
                    });
                }
                MessageKind::Response => self.complete(&chunk.id, message, now),
            },
            Ok(Reassembly::Incomplete { received, total }) => {
                trace!(destination = %self.destination, id = %chunk.id, received, total, "chunk stored");
            }
            Ok(Reassembly::Duplicate) => {
                trace!(destination = %self.destination, id = %chunk.id, index = chunk.index, "replayed chunk");
            }
            Err(err) => {
                warn!(destination = %self.destination, id = %chunk.id, error = %err, "dropping message");
                if chunk.kind == MessageKind::Response
                    && matches!(err, FrameError::MalformedPayload(_))
                    && self.session.in_flight_id() == Some(chunk.id.as_str())
                {
                    self.abort_in_flight(&chunk.id, PeerError::Frame(err));
                    self.pump(now);
                } else {
                    inbound.failures.push(err.into());
                }
            }
        }
    }

    fn on_ack(&mut self, ack: &AckFrame, now: Instant) {
        if let Some(step) = self.session.on_ack(ack) {
            match step {
                Step::Send(frame) => {
                    if let Err(err) = self.write(&frame) {
                        self.abort_in_flight(&ack.id, err);
                        self.pump(now);
                    }
                }
                Step::Finished => {
                    debug!(destination = %self.destination, id = %ack.id, "request delivered")
                }
                Step::Ignored => {
                    trace!(destination = %self.destination, id = %ack.id, index = ack.index, "unexpected ACK")
                }
            }
            return;
        }

        let Some(transfer) = self.responses.get_mut(&ack.id) else {
            trace!(destination = %self.destination, id = %ack.id, "ACK for unknown message");
            return;
        };
        match transfer.on_ack(ack.index) {
            Step::Send(frame) => {
                if let Err(err) = self.write(&frame) {
                    warn!(destination = %self.destination, id = %ack.id, error = %err, "response abandoned");
                    self.responses.remove(&ack.id);
                }
            }
            Step::Finished => {
                debug!(destination = %self.destination, id = %ack.id, "response delivered");
                self.responses.remove(&ack.id);
            }
            Step::Ignored => {
                trace!(destination = %self.destination, id = %ack.id, index = ack.index, "unexpected ACK")
            }
        }
    }

    fn complete(&mut self, id: &str, message: Value, now: Instant) {
        if self.correlation.resolve(id, message) {
            debug!(destination = %self.destination, id = %id, "request completed");
            self.session.finish(id);
            self.pump(now);
        } else {
            debug!(destination = %self.destination, id = %id, "response for unknown or expired request");
        }
    }

    fn abort_in_flight(&mut self, id: &str, err: PeerError) {
        warn!(destination = %self.destination, id = %id, error = %err, "request failed");
        self.session.finish(id);
        self.inbound.discard(MessageKind::Response, id);
        self.correlation.reject(id, err);
    }

    fn fail_queued(&mut self, mut make_err: impl FnMut() -> PeerError) {
        for request in self.session.drain_queue() {
            let _ = request.responder.send(Err(make_err()));
        }
    }

    fn render(&self, kind: MessageKind, id: &str, message: &Value) -> Result<Vec<String>> {
        let chunks = fragment(kind, id, self.gate.secret(), message, &self.config.frame)?;
        Ok(chunks
            .into_iter()
            .map(|chunk| Frame::Chunk(chunk).encode())
            .collect())
    }

    fn write(&self, frame: &str) -> Result<()> {
        self.config.frame.check_fits(frame)?;
        self.writer.write(frame)?;
        trace!(destination = %self.destination, len = frame.len(), "slot write");
        Ok(())
    }
}

fn looks_like_frame(value: &str) -> bool {
    value.starts_with("MSG:") || value.starts_with("ACK:")
}
