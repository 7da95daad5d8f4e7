use tokio::sync::broadcast;

use crate::indexer::IndexingStats;

const EVENT_CAPACITY: usize = 64;

/// Observational signals for UI refreshes and other listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionEvent {
    FoldersChanged,
    FolderAlreadyAdded { path: String },
    IndexingFinished(IndexingStats),
    ReconciliationCompleted { duration_ms: u64 },
}

#[derive(Clone)]
pub struct CollectionEvents {
    tx: broadcast::Sender<CollectionEvent>,
}

impl CollectionEvents {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CollectionEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for CollectionEvents {
    fn default() -> Self {
        Self::new()
    }
}
