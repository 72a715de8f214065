//! Outgoing request queue and stop-and-wait chunk transfer.

use std::collections::VecDeque;

use serde_json::Value;
use slotwire_frame::AckFrame;
use tokio::time::Instant;

use crate::correlation::Responder;

/// Next move after an acknowledgement.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Write this frame next.
    Send(String),
    /// The last chunk was acknowledged.
    Finished,
    /// Not the acknowledgement this transfer is waiting for.
    Ignored,
}

/// One message being written chunk by chunk.
///
/// Chunk `k + 1` is written only after the ACK for chunk `k` arrives.
/// Acknowledgements for any other index are ignored.
#[derive(Debug)]
pub(crate) struct Transfer {
    id: String,
    frames: Vec<String>,
    awaiting: usize,
    finished: bool,
    started: Instant,
}

impl Transfer {
    pub(crate) fn new(id: String, frames: Vec<String>, now: Instant) -> Self {
        Self {
            id,
            frames,
            awaiting: 0,
            finished: false,
            started: now,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn first_frame(&self) -> &str {
        self.frames.first().map(String::as_str).unwrap_or_default()
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    pub(crate) fn on_ack(&mut self, index: usize) -> Step {
        if self.finished || index != self.awaiting {
            return Step::Ignored;
        }
        let next = index + 1;
        match self.frames.get(next) {
            Some(frame) => {
                self.awaiting = next;
                Step::Send(frame.clone())
            }
            None => {
                self.finished = true;
                Step::Finished
            }
        }
    }

    /// Stop writing chunks without waiting for more acknowledgements.
    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }
}

/// A request waiting for its turn.
pub(crate) struct QueuedRequest {
    pub(crate) message: Value,
    pub(crate) responder: Responder,
}

/// FIFO of outgoing requests with at most one in flight.
#[derive(Default)]
pub(crate) struct OutgoingSession {
    queue: VecDeque<QueuedRequest>,
    in_flight: Option<Transfer>,
}

impl OutgoingSession {
    pub(crate) fn push(&mut self, request: QueuedRequest) {
        self.queue.push_back(request);
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    /// Next queued request, only while nothing is in flight.
    pub(crate) fn pop_next(&mut self) -> Option<QueuedRequest> {
        if self.in_flight.is_some() {
            return None;
        }
        self.queue.pop_front()
    }

    pub(crate) fn begin(&mut self, transfer: Transfer) {
        self.in_flight = Some(transfer);
    }

    pub(crate) fn in_flight_id(&self) -> Option<&str> {
        self.in_flight.as_ref().map(Transfer::id)
    }

    /// Route an ACK to the in-flight request. `None` if it is for another id.
    pub(crate) fn on_ack(&mut self, ack: &AckFrame) -> Option<Step> {
        let transfer = self.in_flight.as_mut().filter(|t| t.id() == ack.id)?;
        Some(transfer.on_ack(ack.index))
    }

    /// A response chunk arrived, so the peer has the whole request.
    pub(crate) fn outbound_done(&mut self, id: &str) {
        if let Some(transfer) = self.in_flight.as_mut().filter(|t| t.id() == id) {
            transfer.finish();
        }
    }

    /// Clear the in-flight slot if it holds `id`.
    pub(crate) fn finish(&mut self, id: &str) -> bool {
        if self.in_flight_id() == Some(id) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn drain_queue(&mut self) -> Vec<QueuedRequest> {
        self.queue.drain(..).collect()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}
