use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use cadence_core::domain::job::{Job, JobId};
use cadence_core::SnapshotMerge;
use cadence_db::repositories::JobRepository;

/// Push channel carrying job snapshots from the orchestrator to any
/// live subscriptions. Publishing never blocks and never fails; with no
/// subscribers the snapshot is simply dropped, and the tracker's poll
/// fallback covers anything the channel loses.
#[derive(Clone)]
pub struct JobEventBus {
    sender: broadcast::Sender<Job>,
}

impl JobEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, job: &Job) {
        let _ = self.sender.send(job.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.sender.subscribe()
    }
}

/// Receives exactly one callback per job when it reaches a terminal
/// status. Sync like `AuditSink`; implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, job: &Job);
}

pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, job: &Job) {
        info!(
            event_name = "tracker.job_terminal",
            job_id = %job.id,
            sequence_key = %job.sequence_key.0,
            user_id = %job.user_id,
            status = job.status.as_str(),
            steps_recorded = job.step_results.len(),
            "job reached a terminal status"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationSink {
    notified: Arc<Mutex<Vec<Job>>>,
}

impl InMemoryNotificationSink {
    pub fn notifications(&self) -> Vec<Job> {
        match self.notified.lock() {
            Ok(notified) => notified.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count_for(&self, job_id: &JobId) -> usize {
        self.notifications().iter().filter(|job| &job.id == job_id).count()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, job: &Job) {
        match self.notified.lock() {
            Ok(mut notified) => notified.push(job.clone()),
            Err(poisoned) => poisoned.into_inner().push(job.clone()),
        }
    }
}

/// Job progress feed combining pushed snapshots with a polling
/// fallback.
///
/// Every snapshot, pushed or polled, goes through a [`SnapshotMerge`]
/// so subscribers only ever see forward progress, no matter how the two
/// delivery paths interleave. The terminal notification fires exactly
/// once per job id, even across overlapping subscriptions.
pub struct JobTracker {
    jobs: Arc<dyn JobRepository>,
    bus: JobEventBus,
    notifications: Arc<dyn NotificationSink>,
    poll_interval: Duration,
    notified: Mutex<HashSet<String>>,
}

impl JobTracker {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        bus: JobEventBus,
        notifications: Arc<dyn NotificationSink>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            jobs,
            bus,
            notifications,
            poll_interval,
            notified: Mutex::new(HashSet::new()),
        }
    }

    /// Opens a live feed of snapshots for one job. The stream yields
    /// each accepted snapshot in supersession order and closes after
    /// delivering a terminal one. Subscribing to an already-finished
    /// job delivers the final snapshot and closes immediately.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> mpsc::Receiver<Job> {
        let (tx, rx) = mpsc::channel(16);
        let tracker = Arc::clone(self);
        let mut pushed = tracker.bus.subscribe();

        tokio::spawn(async move {
            // First tick fires immediately, so an already-terminal job
            // is delivered without waiting a full interval.
            let mut ticker = tokio::time::interval(tracker.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut merge = SnapshotMerge::new();
            let mut push_open = true;

            loop {
                let candidate = tokio::select! {
                    // Receiver dropped; stop polling on its behalf.
                    _ = tx.closed() => break,
                    update = pushed.recv(), if push_open => match update {
                        Ok(job) if job.id == job_id => Some(job),
                        Ok(_) => None,
                        // A lagged receiver lost pushes; the next poll
                        // re-reads the store and catches up.
                        Err(broadcast::error::RecvError::Lagged(_)) => None,
                        Err(broadcast::error::RecvError::Closed) => {
                            push_open = false;
                            None
                        }
                    },
                    _ = ticker.tick() => match tracker.jobs.find_by_id(&job_id).await {
                        Ok(found) => found,
                        Err(error) => {
                            warn!(
                                event_name = "tracker.poll_failed",
                                job_id = %job_id,
                                error = %error,
                                "job poll failed; will retry on the next tick"
                            );
                            None
                        }
                    },
                };

                let Some(snapshot) = candidate else { continue };
                if !merge.apply(snapshot.clone()).is_applied() {
                    continue;
                }

                let terminal = snapshot.status.is_terminal();
                if terminal {
                    tracker.notify_terminal(&snapshot);
                }
                if tx.send(snapshot).await.is_err() || terminal {
                    break;
                }
            }
        });

        rx
    }

    fn notify_terminal(&self, job: &Job) {
        let mut notified = match self.notified.lock() {
            Ok(notified) => notified,
            Err(poisoned) => poisoned.into_inner(),
        };
        if notified.insert(job.id.0.clone()) {
            self.notifications.notify(job);
        }
    }
}
