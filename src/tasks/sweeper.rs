//! Periodic background sweeps over the task registry.
//!
//! Each sweeper runs as its own long-lived tokio task, started at boot and
//! stopped through a `watch` channel at shutdown. Sweeps take `now` as an
//! argument so they can be exercised directly without waiting on timers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::record::TaskId;
use super::registry::TaskRegistry;
use crate::storage::UploadStore;

/// One pass of a periodic maintenance job.
#[async_trait]
pub trait Sweep: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run once. Returns how many tasks were affected.
    async fn sweep(&self, now: DateTime<Utc>) -> usize;
}

/// Force-fails tasks that have been `Running` longer than the grace period.
///
/// Backstop for a controller whose own timeout path never fired.
pub struct RecoverySweeper {
    registry: Arc<TaskRegistry>,
    grace: chrono::Duration,
}

impl RecoverySweeper {
    pub fn new(registry: Arc<TaskRegistry>, grace: Duration) -> Self {
        Self {
            registry,
            grace: chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX),
        }
    }
}

#[async_trait]
impl Sweep for RecoverySweeper {
    fn name(&self) -> &'static str {
        "recovery"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let recovered = self.registry.recover_stale(now, self.grace);
        for id in &recovered {
            tracing::warn!(task_id = %id, grace_secs = self.grace.num_seconds(), "Recovered stuck task");
        }
        recovered.len()
    }
}

/// Evicts every task created longer ago than the retention window.
pub struct RetentionSweeper {
    registry: Arc<TaskRegistry>,
    window: chrono::Duration,
    store: Option<UploadStore>,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<TaskRegistry>, window: Duration) -> Self {
        Self {
            registry,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            store: None,
        }
    }

    /// Also remove evicted tasks' files from disk.
    pub fn with_store(mut self, store: UploadStore) -> Self {
        self.store = Some(store);
        self
    }

    async fn remove_files(&self, id: &TaskId) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id).await {
                tracing::warn!(task_id = %id, "Failed to remove evicted task files: {}", e);
            }
        }
    }
}

#[async_trait]
impl Sweep for RetentionSweeper {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.registry.evict_older_than(now, self.window);
        for record in &evicted {
            if record.state.is_terminal() {
                tracing::debug!(task_id = %record.id, state = %record.state, "Evicted expired task");
            } else {
                tracing::warn!(task_id = %record.id, state = %record.state, "Evicted expired task that never finished");
            }
            self.remove_files(&record.id).await;
        }
        evicted.len()
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(sweeper = self.name, "Sweeper task failed: {}", e);
        }
    }
}

/// Run `sweeper` every `period` until stopped. The first sweep happens one
/// period after start.
pub fn spawn_periodic<S: Sweep>(sweeper: S, period: Duration) -> SweeperHandle {
    let name = sweeper.name();
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        tracing::debug!(sweeper = name, period_secs = period.as_secs_f64(), "Sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let affected = sweeper.sweep(Utc::now()).await;
                    if affected > 0 {
                        tracing::info!(sweeper = name, affected, "Sweep complete");
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(sweeper = name, "Sweeper stopped");
    });

    SweeperHandle {
        name,
        stop: stop_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{FailureKind, InputRef, TaskState, RECOVERED_REASON};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn input() -> InputRef {
        InputRef {
            filename: "doc.pdf".to_string(),
            size_bytes: 1,
            mime_type: None,
            ocr: false,
        }
    }

    #[tokio::test]
    async fn test_recovery_fails_stale_running_task() {
        let registry = Arc::new(TaskRegistry::new());
        let id = registry.create(input()).unwrap().id;
        registry.mark_running(&id).unwrap();

        let sweeper = RecoverySweeper::new(Arc::clone(&registry), Duration::from_secs(600));
        assert_eq!(sweeper.sweep(Utc::now()).await, 0);

        let later = Utc::now() + chrono::Duration::seconds(601);
        assert_eq!(sweeper.sweep(later).await, 1);

        let record = registry.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.failure, Some(FailureKind::Recovered));
        assert_eq!(record.error.as_deref(), Some(RECOVERED_REASON));

        // Already terminal: nothing more to do.
        assert_eq!(sweeper.sweep(later).await, 0);
    }

    #[tokio::test]
    async fn test_retention_evicts_and_removes_files() {
        let dir = tempdir().unwrap();
        let store = UploadStore::new(dir.path());
        let registry = Arc::new(TaskRegistry::new());
        let id = registry.create(input()).unwrap().id;
        store.save_upload(&id, "doc.pdf", b"%PDF").await.unwrap();

        let sweeper = RetentionSweeper::new(Arc::clone(&registry), Duration::from_secs(3600))
            .with_store(store.clone());
        assert_eq!(sweeper.sweep(Utc::now()).await, 0);

        let later = Utc::now() + chrono::Duration::seconds(3601);
        assert_eq!(sweeper.sweep(later).await, 1);
        assert!(registry.list().is_empty());
        assert!(!store.upload_dir(&id).exists());
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Sweep for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn sweep(&self, _now: DateTime<Utc>) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[tokio::test]
    async fn test_periodic_runs_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(Counting(Arc::clone(&runs)), Duration::from_millis(20));
        assert_eq!(handle.name(), "counting");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        handle.stop().await;
        let after_stop = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }
}
