use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, TransportError};

/// Recommended hard ceiling for a single slot write, in bytes.
pub const DEFAULT_MAX_SLOT_BYTES: usize = 4000;

/// Write side of a signaling slot.
///
/// A write replaces the slot value wholesale. Implementations must reject
/// values longer than [`SlotWriter::max_value_len`] instead of truncating.
pub trait SlotWriter: Send + Sync + 'static {
    /// Overwrite the current slot value.
    fn write(&self, value: &str) -> Result<()>;

    /// Hard ceiling for a single write, in bytes.
    fn max_value_len(&self) -> usize {
        DEFAULT_MAX_SLOT_BYTES
    }
}

/// Observation side of a signaling slot.
///
/// Only the latest value is visible. If the slot changes several times
/// between two calls to [`SlotWatcher::changed`], the intermediate values
/// are never observed.
pub struct SlotWatcher {
    rx: watch::Receiver<String>,
}

impl SlotWatcher {
    /// Wrap a watch receiver fed by the host environment.
    pub fn new(rx: watch::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Current slot value without marking it observed.
    pub fn current(&self) -> String {
        self.rx.borrow().clone()
    }

    /// Current slot value, marking it observed.
    pub fn take_current(&mut self) -> String {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next change edge and return the value at that time.
    ///
    /// Returns `Err(TransportError::Closed)` once the feeding side is gone.
    pub async fn changed(&mut self) -> Result<String> {
        self.rx.changed().await.map_err(|_| TransportError::Closed)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

impl fmt::Debug for SlotWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotWatcher")
            .field("current_len", &self.rx.borrow().len())
            .finish()
    }
}

/// Push side used by host glue to report observed slot values.
///
/// The host's change callback calls [`SlotFeed::observe`] with the new value;
/// unchanged values do not produce an edge.
#[derive(Clone)]
pub struct SlotFeed {
    tx: Arc<watch::Sender<String>>,
}

impl SlotFeed {
    /// Report the slot's current value. Returns `true` if it produced an edge.
    pub fn observe(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }
}

impl fmt::Debug for SlotFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotFeed")
            .field("watchers", &self.tx.receiver_count())
            .finish()
    }
}

/// Create a feed/watcher pair for bridging a callback-style subscription.
pub fn slot_feed() -> (SlotFeed, SlotWatcher) {
    let (tx, rx) = watch::channel(String::new());
    (SlotFeed { tx: Arc::new(tx) }, SlotWatcher::new(rx))
}

/// The write/observe pair that connects this process to one peer.
pub struct SlotLink {
    /// Slot the peer observes.
    pub writer: Arc<dyn SlotWriter>,
    /// Slot the peer writes.
    pub watcher: SlotWatcher,
}

impl SlotLink {
    /// Build a link from a writer and a watcher.
    pub fn new(writer: impl SlotWriter, watcher: SlotWatcher) -> Self {
        Self {
            writer: Arc::new(writer),
            watcher,
        }
    }
}

impl fmt::Debug for SlotLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLink")
            .field("max_value_len", &self.writer.max_value_len())
            .field("watcher", &self.watcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feed_delivers_latest_value() {
        let (feed, mut watcher) = slot_feed();

        assert!(feed.observe("first"));
        assert!(feed.observe("second"));

        let value = watcher.changed().await.unwrap();
        assert_eq!(value, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_value_is_not_an_edge() {
        let (feed, mut watcher) = slot_feed();
        assert!(feed.observe("same"));
        assert_eq!(watcher.changed().await.unwrap(), "same");

        assert!(!feed.observe("same"));
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), watcher.changed()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn watcher_reports_closed_feed() {
        let (feed, mut watcher) = slot_feed();
        drop(feed);

        let err = watcher.changed().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn take_current_marks_value_seen() {
        let (feed, mut watcher) = slot_feed();
        feed.observe("INIT:abc");

        assert_eq!(watcher.current(), "INIT:abc");
        assert_eq!(watcher.take_current(), "INIT:abc");
    }
}
