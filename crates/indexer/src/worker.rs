use std::sync::Arc;
use std::time::{Duration, SystemTime};

use library::{
    Cancellation, Collection, CollectionEvent, IndexingStats, LibraryError, ReconcileOutcome,
};
use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity_store::ActivityStore;

#[derive(Clone, Debug, PartialEq)]
pub enum WorkerStatus {
    Idle,
    Running { started: SystemTime },
    Ready(PassSummary),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassSummary {
    pub indexing: IndexingStats,
    pub outcome: ReconcileOutcome,
}

/// Handle to the single indexing worker. Triggers that arrive while a pass
/// is running collapse into one pending re-run.
#[derive(Clone)]
pub struct IndexWorker {
    trigger: Arc<Notify>,
    stop: Arc<Notify>,
    cancel: Cancellation,
    status: Arc<RwLock<WorkerStatus>>,
}

impl IndexWorker {
    pub fn spawn(collection: Collection, activity: ActivityStore) -> (Self, JoinHandle<()>) {
        let worker = Self {
            trigger: Arc::new(Notify::new()),
            stop: Arc::new(Notify::new()),
            cancel: Cancellation::new(),
            status: Arc::new(RwLock::new(WorkerStatus::Idle)),
        };
        let handle = tokio::spawn(worker.clone().run(collection, activity));
        (worker, handle)
    }

    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.read().clone()
    }

    /// Stops after the current phase; the join handle completes once the
    /// worker has settled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.stop.notify_one();
    }

    async fn run(self, collection: Collection, activity: ActivityStore) {
        loop {
            tokio::select! {
                _ = self.trigger.notified() => {}
                _ = self.stop.notified() => break,
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.run_pass(&collection, &activity).await;
        }
        debug!("Index worker stopped");
    }

    async fn run_pass(&self, collection: &Collection, activity: &ActivityStore) {
        *self.status.write() = WorkerStatus::Running {
            started: SystemTime::now(),
        };
        let _ = activity.add_event("index", "Collection indexing started.");

        let indexer = collection.indexer();
        let reconciler = collection.reconciler();
        let cancel = self.cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let indexing = indexer.index_collection()?;
            let outcome = reconciler.reconcile(&cancel)?;
            Ok::<PassSummary, LibraryError>(PassSummary { indexing, outcome })
        })
        .await;

        let status = match result {
            Ok(Ok(summary)) => {
                let message = describe_pass(&summary);
                info!("{}", message);
                let _ = activity.add_event("index", message);
                WorkerStatus::Ready(summary)
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                warn!("Collection indexing failed: {}", message);
                let _ = activity
                    .add_event("index", format!("Collection indexing failed: {}", message));
                WorkerStatus::Error(message)
            }
            Err(err) => {
                let message = err.to_string();
                warn!("Collection indexing join error: {}", message);
                let _ = activity
                    .add_event("index", format!("Collection indexing failed: {}", message));
                WorkerStatus::Error(message)
            }
        };
        *self.status.write() = status;
    }
}

fn describe_pass(summary: &PassSummary) -> String {
    let stats = &summary.indexing;
    let tracks = format!(
        "{} added, {} updated, {} removed, {} unreadable",
        stats.added, stats.updated, stats.removed, stats.failed
    );
    match &summary.outcome {
        ReconcileOutcome::Completed(report) => format!(
            "Collection indexing finished: {}; artwork: {} added, {} rows removed, {} files deleted in {} ms.",
            tracks,
            report.artwork_added,
            report.orphaned_rows_removed + report.rows_cleared,
            report.files_deleted,
            report.duration_ms
        ),
        ReconcileOutcome::Cancelled { completed_phases } => format!(
            "Collection indexing finished: {}; artwork reconciliation cancelled after {} phases.",
            tracks, completed_phases
        ),
        ReconcileOutcome::AlreadyRunning => format!(
            "Collection indexing finished: {}; artwork reconciliation already running.",
            tracks
        ),
    }
}

/// Re-triggers the worker every `interval`. The first tick is skipped;
/// startup indexing has its own switch.
pub fn spawn_periodic_trigger(worker: IndexWorker, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if worker.cancel.is_cancelled() {
                break;
            }
            debug!("Periodic re-index trigger");
            worker.trigger();
        }
    })
}

/// Logs collection events and re-indexes when the folder list changes.
pub fn spawn_event_listener(collection: &Collection, worker: IndexWorker) -> JoinHandle<()> {
    let mut rx = collection.events().subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(CollectionEvent::FoldersChanged) => worker.trigger(),
                Ok(CollectionEvent::FolderAlreadyAdded { path }) => {
                    info!("Folder {:?} was already in the collection", path)
                }
                Ok(CollectionEvent::IndexingFinished(stats)) => {
                    debug!("Indexing finished: {:?}", stats)
                }
                Ok(CollectionEvent::ReconciliationCompleted { duration_ms }) => {
                    debug!("Reconciliation completed in {} ms", duration_ms)
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Event listener skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
