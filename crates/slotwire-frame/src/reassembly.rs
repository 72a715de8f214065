//! Per-message partial chunk store.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::codec::{decode_message, FrameConfig};
use crate::error::{FrameError, Result};
use crate::kind::MessageKind;
use crate::wire::ChunkFrame;

type Key = (MessageKind, String);

/// Outcome of feeding one chunk into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reassembly {
    /// Every chunk has arrived; the decoded message.
    Complete(Value),
    /// Still waiting for more chunks.
    Incomplete { received: usize, total: usize },
    /// The message was already completed; the chunk is a replayed edge.
    Duplicate,
}

#[derive(Debug)]
struct Entry {
    total: usize,
    slots: BTreeMap<usize, String>,
    bytes: usize,
    first_seen: Instant,
}

/// Accumulates chunks per `(kind, id)` until a message is complete.
///
/// The `total` reported by the first chunk of a message is authoritative.
/// Completion is decided by counting distinct filled indexes, so chunks may
/// arrive in any order and repeated chunks never double-count.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    entries: HashMap<Key, Entry>,
    completed: HashMap<Key, Instant>,
    max_message_bytes: usize,
}

impl ReassemblyBuffer {
    /// Create an empty buffer using the message limit from `config`.
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            entries: HashMap::new(),
            completed: HashMap::new(),
            max_message_bytes: config.max_message_bytes,
        }
    }

    /// Store one chunk.
    ///
    /// Returns `ProtocolViolation` for an impossible position, a `total` that
    /// contradicts the first chunk, or a message over the size limit; the
    /// offending entry is discarded. Returns `MalformedPayload` if the
    /// completed message cannot be decoded.
    pub fn on_chunk(&mut self, chunk: &ChunkFrame, now: Instant) -> Result<Reassembly> {
        let key = (chunk.kind, chunk.id.clone());

        if self.completed.contains_key(&key) {
            return Ok(Reassembly::Duplicate);
        }

        if chunk.total == 0 || chunk.index >= chunk.total {
            self.entries.remove(&key);
            return Err(FrameError::ProtocolViolation(format!(
                "chunk {}/{} of {} {} is out of range",
                chunk.index, chunk.total, chunk.kind, chunk.id
            )));
        }
        if chunk.total > self.max_message_bytes.max(1) {
            self.entries.remove(&key);
            return Err(FrameError::ProtocolViolation(format!(
                "{} {} announces {} chunks",
                chunk.kind, chunk.id, chunk.total
            )));
        }

        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            total: chunk.total,
            slots: BTreeMap::new(),
            bytes: 0,
            first_seen: now,
        });

        if entry.total != chunk.total {
            let first = entry.total;
            self.entries.remove(&key);
            return Err(FrameError::ProtocolViolation(format!(
                "conflicting total for {} {}: {} then {}",
                chunk.kind, chunk.id, first, chunk.total
            )));
        }

        if !entry.slots.contains_key(&chunk.index) {
            entry.bytes += chunk.payload.len();
            if entry.bytes > self.max_message_bytes {
                let bytes = entry.bytes;
                self.entries.remove(&key);
                return Err(FrameError::ProtocolViolation(format!(
                    "{} {} exceeds {} bytes ({bytes})",
                    chunk.kind, chunk.id, self.max_message_bytes
                )));
            }
            entry.slots.insert(chunk.index, chunk.payload.clone());
        }

        let received = entry.slots.len();
        let total = entry.total;
        if received < total {
            return Ok(Reassembly::Incomplete { received, total });
        }

        let Some(entry) = self.entries.remove(&key) else {
            return Ok(Reassembly::Incomplete { received, total });
        };
        self.completed.insert(key, now);
        decode_message(entry.slots.values().map(String::as_str)).map(Reassembly::Complete)
    }

    /// Drop the partial entry for a message, if any.
    pub fn discard(&mut self, kind: MessageKind, id: &str) -> bool {
        self.entries.remove(&(kind, id.to_string())).is_some()
    }

    /// Evict partial entries and completion markers older than `ttl`.
    ///
    /// Returns the number of partial entries evicted.
    pub fn evict_stale(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.first_seen) < ttl);
        self.completed
            .retain(|_, done| now.saturating_duration_since(*done) < ttl);
        before - self.entries.len()
    }

    /// Drop completion markers older than `ttl`, leaving partial entries alone.
    ///
    /// Returns the number of markers dropped.
    pub fn expire_completed(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.completed.len();
        self.completed
            .retain(|_, done| now.saturating_duration_since(*done) < ttl);
        before - self.completed.len()
    }

    /// When the oldest completion marker was recorded.
    pub fn oldest_completed(&self) -> Option<Instant> {
        self.completed.values().copied().min()
    }

    /// Number of completion markers held for replay detection.
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// When the oldest tracked entry or marker was first seen.
    pub fn oldest(&self) -> Option<Instant> {
        self.entries
            .values()
            .map(|entry| entry.first_seen)
            .chain(self.completed.values().copied())
            .min()
    }

    /// Number of partially received messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no message is partially received.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry and completion marker.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.completed.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::{fragment, MIN_FRAME_OVERHEAD};

    fn chunks_of(kind: MessageKind, id: &str, message: &Value) -> Vec<ChunkFrame> {
        let config = FrameConfig {
            max_slot_bytes: MIN_FRAME_OVERHEAD + 5,
            ..FrameConfig::default()
        };
        fragment(kind, id, None, message, &config).unwrap()
    }

    fn buffer() -> ReassemblyBuffer {
        ReassemblyBuffer::new(&FrameConfig::default())
    }

    #[test]
    fn completes_in_order() {
        let message = json!({"op": "ping"});
        let chunks = chunks_of(MessageKind::Request, "a", &message);
        let now = Instant::now();
        let mut buf = buffer();

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(matches!(
                buf.on_chunk(chunk, now).unwrap(),
                Reassembly::Incomplete { .. }
            ));
        }
        let last = buf.on_chunk(chunks.last().unwrap(), now).unwrap();
        assert_eq!(last, Reassembly::Complete(message));
        assert!(buf.is_empty());
    }

    #[test]
    fn completes_out_of_order() {
        let message = json!({"list": [1, 2, 3, 4, 5, 6]});
        let mut chunks = chunks_of(MessageKind::Response, "b", &message);
        chunks.reverse();
        let now = Instant::now();
        let mut buf = buffer();

        let mut outcome = None;
        for chunk in &chunks {
            outcome = Some(buf.on_chunk(chunk, now).unwrap());
        }
        assert_eq!(outcome, Some(Reassembly::Complete(message)));
    }

    #[test]
    fn duplicate_chunk_does_not_double_count() {
        let message = json!({"op": "ping"});
        let chunks = chunks_of(MessageKind::Request, "c", &message);
        assert!(chunks.len() >= 3);
        let now = Instant::now();
        let mut buf = buffer();

        buf.on_chunk(&chunks[0], now).unwrap();
        let again = buf.on_chunk(&chunks[0], now).unwrap();
        assert_eq!(
            again,
            Reassembly::Incomplete {
                received: 1,
                total: chunks.len()
            }
        );
    }

    #[test]
    fn replayed_final_chunk_is_duplicate() {
        let message = json!(1);
        let chunks = chunks_of(MessageKind::Request, "d", &message);
        assert_eq!(chunks.len(), 1);
        let now = Instant::now();
        let mut buf = buffer();

        assert_eq!(
            buf.on_chunk(&chunks[0], now).unwrap(),
            Reassembly::Complete(message)
        );
        assert_eq!(buf.on_chunk(&chunks[0], now).unwrap(), Reassembly::Duplicate);
    }

    #[test]
    fn conflicting_total_discards_entry() {
        let chunks = chunks_of(MessageKind::Request, "e", &json!({"op": "ping"}));
        let now = Instant::now();
        let mut buf = buffer();
        buf.on_chunk(&chunks[0], now).unwrap();

        let mut liar = chunks[1].clone();
        liar.total += 1;
        let err = buf.on_chunk(&liar, now).unwrap_err();
        assert!(matches!(err, FrameError::ProtocolViolation(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut chunk = chunks_of(MessageKind::Request, "f", &json!(1))[0].clone();
        chunk.index = 4;
        chunk.total = 2;
        let err = buffer().on_chunk(&chunk, Instant::now()).unwrap_err();
        assert!(matches!(err, FrameError::ProtocolViolation(_)));
    }

    #[test]
    fn malformed_payload_reported_and_isolated() {
        let now = Instant::now();
        let mut buf = buffer();
        let bad = ChunkFrame {
            secret: None,
            kind: MessageKind::Request,
            id: "bad".to_string(),
            index: 0,
            total: 1,
            payload: "e25vdC1qc29u".to_string(),
        };
        let err = buf.on_chunk(&bad, now).unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload(_)));

        let good = chunks_of(MessageKind::Request, "good", &json!("ok"));
        let mut last = None;
        for chunk in &good {
            last = Some(buf.on_chunk(chunk, now).unwrap());
        }
        assert_eq!(last, Some(Reassembly::Complete(json!("ok"))));
    }

    #[test]
    fn request_and_response_with_same_id_are_separate() {
        let now = Instant::now();
        let mut buf = buffer();
        let req = chunks_of(MessageKind::Request, "same", &json!({"op": "ping"}));
        let res = chunks_of(MessageKind::Response, "same", &json!({"op": "pong"}));

        buf.on_chunk(&req[0], now).unwrap();
        buf.on_chunk(&res[0], now).unwrap();
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn stale_entries_are_evicted() {
        let start = Instant::now();
        let mut buf = buffer();
        let chunks = chunks_of(MessageKind::Request, "slow", &json!({"op": "ping"}));
        buf.on_chunk(&chunks[0], start).unwrap();
        assert_eq!(buf.oldest(), Some(start));

        assert_eq!(buf.evict_stale(start + Duration::from_secs(5), Duration::from_secs(10)), 0);
        assert_eq!(buf.evict_stale(start + Duration::from_secs(10), Duration::from_secs(10)), 1);
        assert!(buf.is_empty());
        assert_eq!(buf.oldest(), None);
    }

    #[test]
    fn completion_markers_expire_on_their_own() {
        let start = Instant::now();
        let mut buf = buffer();
        for n in 0..10_000 {
            let id = format!("m-{n}");
            let chunk = &chunks_of(MessageKind::Request, &id, &json!(1))[0];
            buf.on_chunk(chunk, start).unwrap();
        }
        let partial = chunks_of(MessageKind::Request, "open", &json!({"op": "ping"}));
        buf.on_chunk(&partial[0], start).unwrap();

        assert_eq!(buf.completed_len(), 10_000);
        assert_eq!(buf.oldest_completed(), Some(start));

        let ttl = Duration::from_secs(30);
        assert_eq!(buf.expire_completed(start + Duration::from_secs(29), ttl), 0);
        assert_eq!(buf.expire_completed(start + ttl, ttl), 10_000);
        assert_eq!(buf.completed_len(), 0);
        assert_eq!(buf.oldest_completed(), None);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn oversized_message_rejected() {
        let config = FrameConfig {
            max_message_bytes: 8,
            ..FrameConfig::default()
        };
        let mut buf = ReassemblyBuffer::new(&config);
        let chunk = ChunkFrame {
            secret: None,
            kind: MessageKind::Request,
            id: "big".to_string(),
            index: 0,
            total: 2,
            payload: "x".repeat(9),
        };
        let err = buf.on_chunk(&chunk, Instant::now()).unwrap_err();
        assert!(matches!(err, FrameError::ProtocolViolation(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn discard_removes_partial_entry() {
        let mut buf = buffer();
        let chunks = chunks_of(MessageKind::Response, "gone", &json!({"op": "ping"}));
        buf.on_chunk(&chunks[0], Instant::now()).unwrap();

        assert!(buf.discard(MessageKind::Response, "gone"));
        assert!(!buf.discard(MessageKind::Response, "gone"));
        assert!(buf.is_empty());
    }
}
