//! In-process slot backed by a `tokio::sync::watch` channel.
//!
//! Behaves like a real signaling slot: writes overwrite, observers see only
//! the latest value, identical rewrites produce no edge, and oversized
//! writes are rejected. Every accepted write is also appended to a history
//! log so callers can inspect the exact frame sequence.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{Result, TransportError};
use crate::traits::{SlotLink, SlotWatcher, SlotWriter};

struct Inner {
    tx: watch::Sender<String>,
    max_len: usize,
    history: Mutex<Vec<String>>,
}

/// Shared in-memory slot. Clones refer to the same slot.
#[derive(Clone)]
pub struct MemorySlot {
    inner: Arc<Inner>,
}

impl MemorySlot {
    /// Create an empty slot with the given per-write ceiling.
    pub fn new(max_len: usize) -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self {
            inner: Arc::new(Inner {
                tx,
                max_len,
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to change edges on this slot.
    pub fn watch(&self) -> SlotWatcher {
        SlotWatcher::new(self.inner.tx.subscribe())
    }

    /// Current slot value.
    pub fn value(&self) -> String {
        self.inner.tx.borrow().clone()
    }

    /// Every accepted write, in order.
    pub fn history(&self) -> Vec<String> {
        match self.inner.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Link that writes to `self` and observes `inbound`.
    pub fn link_with(&self, inbound: &MemorySlot) -> SlotLink {
        SlotLink::new(self.clone(), inbound.watch())
    }

    /// Two crossed links: whatever one side writes, the other observes.
    pub fn pair(max_len: usize) -> (SlotLink, SlotLink) {
        let left_to_right = MemorySlot::new(max_len);
        let right_to_left = MemorySlot::new(max_len);
        (
            left_to_right.link_with(&right_to_left),
            right_to_left.link_with(&left_to_right),
        )
    }
}

impl SlotWriter for MemorySlot {
    fn write(&self, value: &str) -> Result<()> {
        if value.len() > self.inner.max_len {
            return Err(TransportError::ValueTooLarge {
                size: value.len(),
                max: self.inner.max_len,
            });
        }

        match self.inner.history.lock() {
            Ok(mut history) => history.push(value.to_string()),
            Err(poisoned) => poisoned.into_inner().push(value.to_string()),
        }

        let changed = self.inner.tx.send_if_modified(|current| {
            if current == value {
                false
            } else {
                value.clone_into(current);
                true
            }
        });
        if !changed {
            tracing::trace!(len = value.len(), "slot rewrite with identical value");
        }
        Ok(())
    }

    fn max_value_len(&self) -> usize {
        self.inner.max_len
    }
}

impl fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySlot")
            .field("max_len", &self.inner.max_len)
            .field("watchers", &self.inner.tx.receiver_count())
            .finish()
    }
}
