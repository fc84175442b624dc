use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::repository::EntryRepository;

enum UsageEvent {
    Hit(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct TrackerCounters {
    recorded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of what the background recorder has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTrackerStats {
    pub recorded: u64,
    pub failed: u64,
    /// Events that could not be queued because the worker had stopped.
    pub dropped: u64,
}

/// Queues "entry was surfaced" events and persists them off the request path.
///
/// Must be created inside a Tokio runtime. Dropping the tracker closes the queue; the
/// worker writes whatever is still queued and then exits.
pub struct UsageTracker {
    sender: mpsc::UnboundedSender<UsageEvent>,
    counters: Arc<TrackerCounters>,
    worker: JoinHandle<()>,
}

impl UsageTracker {
    pub fn spawn(repository: Arc<dyn EntryRepository>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(TrackerCounters::default());
        let worker = tokio::spawn(run_recorder(receiver, repository, Arc::clone(&counters)));

        Self {
            sender,
            counters,
            worker,
        }
    }

    /// Never blocks and never fails; problems only show up in logs and [`Self::stats`].
    pub fn record(&self, entry_id: &str) {
        if self
            .sender
            .send(UsageEvent::Hit(entry_id.to_owned()))
            .is_err()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(entry_id, "Usage recorder has stopped; dropping usage event");
        }
    }

    /// Resolves once every event queued before this call has been processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(UsageEvent::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// False once the worker task has exited.
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    pub fn stats(&self) -> UsageTrackerStats {
        UsageTrackerStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_recorder(
    mut receiver: mpsc::UnboundedReceiver<UsageEvent>,
    repository: Arc<dyn EntryRepository>,
    counters: Arc<TrackerCounters>,
) {
    while let Some(event) = receiver.recv().await {
        match event {
            UsageEvent::Hit(entry_id) => match repository.increment_usage(&entry_id).await {
                Ok(()) => {
                    counters.recorded.fetch_add(1, Ordering::Relaxed);
                    debug!(%entry_id, "Recorded knowledge entry usage");
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(%entry_id, error = %err, "Failed to record knowledge entry usage");
                }
            },
            UsageEvent::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::StaticEntryRepository;
    use common::storage::types::knowledge_entry::KnowledgeEntry;

    fn repository() -> Arc<StaticEntryRepository> {
        Arc::new(StaticEntryRepository::new(vec![KnowledgeEntry::new(
            "a",
            "General",
            vec!["Question".to_string()],
            "answer",
            Vec::new(),
            0,
        )]))
    }

    #[tokio::test]
    async fn records_hits_in_the_background() {
        let repository = repository();
        let tracker = UsageTracker::spawn(Arc::clone(&repository) as Arc<dyn EntryRepository>);

        tracker.record("a");
        tracker.record("a");
        tracker.flush().await;

        assert_eq!(repository.usage_count("a").await, Some(2));
        assert_eq!(
            tracker.stats(),
            UsageTrackerStats {
                recorded: 2,
                failed: 0,
                dropped: 0
            }
        );
    }

    #[tokio::test]
    async fn failures_are_counted_not_raised() {
        let repository = repository();
        let tracker = UsageTracker::spawn(Arc::clone(&repository) as Arc<dyn EntryRepository>);

        tracker.record("missing");
        tracker.record("a");
        tracker.flush().await;

        let stats = tracker.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.recorded, 1);
        assert_eq!(repository.usage_count("a").await, Some(1));
    }

    #[tokio::test]
    async fn queued_hits_are_written_after_the_tracker_is_dropped() {
        let repository = repository();
        let tracker = UsageTracker::spawn(Arc::clone(&repository) as Arc<dyn EntryRepository>);

        tracker.record("a");
        tracker.record("a");
        drop(tracker);

        for _ in 0..100 {
            if repository.usage_count("a").await == Some(2) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(repository.usage_count("a").await, Some(2));
    }

    #[tokio::test]
    async fn events_after_the_worker_stops_are_dropped() {
        let tracker = UsageTracker::spawn(repository());
        tracker.worker.abort();
        // Let the abort land so the receiver is gone.
        while tracker.is_running() {
            tokio::task::yield_now().await;
        }

        tracker.record("a");
        tracker.flush().await;

        assert_eq!(tracker.stats().dropped, 1);
    }
}
