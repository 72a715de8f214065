//! Pending-request table keyed by request id.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{PeerError, Result};

/// Completion handle for a caller awaiting a response.
pub(crate) type Responder = oneshot::Sender<Result<Value>>;

struct Pending {
    deadline: Instant,
    timeout: Duration,
    responder: Responder,
}

/// Maps request ids to their callers and deadlines.
///
/// Every entry is settled exactly once: resolved, rejected, expired or
/// cancelled. Settling removes the entry, so late responses find nothing.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    pending: HashMap<String, Pending>,
}

impl CorrelationTable {
    pub(crate) fn register(
        &mut self,
        id: String,
        now: Instant,
        timeout: Duration,
        responder: Responder,
    ) {
        self.pending.insert(
            id,
            Pending {
                deadline: now + timeout,
                timeout,
                responder,
            },
        );
    }

    /// Deliver a response. Returns `false` if nobody was waiting for `id`.
    pub(crate) fn resolve(&mut self, id: &str, message: Value) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                let _ = pending.responder.send(Ok(message));
                true
            }
            None => false,
        }
    }

    pub(crate) fn reject(&mut self, id: &str, err: PeerError) -> bool {
        match self.pending.remove(id) {
            Some(pending) => {
                let _ = pending.responder.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fail every entry whose deadline has passed with `PeerError::Timeout`.
    ///
    /// Returns the expired ids.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                let _ = pending
                    .responder
                    .send(Err(PeerError::Timeout(pending.timeout)));
            }
        }
        expired
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub(crate) fn reject_all(&mut self, mut make_err: impl FnMut() -> PeerError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.responder.send(Err(make_err()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
