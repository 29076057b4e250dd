//! Note-change event stream.
//!
//! Each publish carries one batch: the effective changes of a single engine
//! mutation. Subscribers that fall behind see `RecvError::Lagged`.

use crate::model::NoteChangeEntry;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One mutation's worth of changes.
pub type ChangeBatch = Arc<Vec<NoteChangeEntry>>;

/// Broadcast bus of change batches.
#[derive(Debug, Clone)]
pub struct NoteEventBus {
    tx: broadcast::Sender<ChangeBatch>,
    capacity: usize,
}

impl NoteEventBus {
    /// Bus buffering up to `capacity` batches per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Buffer size.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish a batch; returns the number of receivers (0 without subscribers).
    ///
    /// Empty batches are not sent.
    pub fn publish(&self, batch: Vec<NoteChangeEntry>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        self.tx.send(Arc::new(batch)).unwrap_or(0)
    }

    /// Receive every batch published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.tx.subscribe()
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
