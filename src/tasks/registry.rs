//! In-memory work registry: the single source of truth for task existence and state.
//!
//! All access goes through a `RwLock`-guarded map. Writers hold the lock only
//! for the duration of a single mutation, so reads (status polls, health
//! snapshots) never wait behind a worker. Nothing here is durable.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::error::TaskError;
use super::record::{
    FailureKind, InputRef, TaskId, TaskOutcome, TaskRecord, TaskState, Transition,
};

/// Reason stored on tasks force-failed by the recovery sweep.
pub const RECOVERED_REASON: &str = "recovered: processing timeout";

/// Per-state task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Concurrency-safe task map.
///
/// Records only change through the transition methods; there is no public
/// way to mutate a record in place:
///
/// ```compile_fail
/// use docsift::tasks::{TaskId, TaskRegistry};
///
/// let registry = TaskRegistry::new();
/// let _ = registry.update(&TaskId::new(), |record| record.finished_at = None);
/// ```
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    /// 0 means unbounded.
    capacity: usize,
}

impl TaskRegistry {
    /// Create an unbounded registry.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a registry that refuses new tasks beyond `capacity` (0 = unbounded).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a fresh `Queued` record and return a snapshot of it.
    pub fn create(&self, input: InputRef) -> Result<TaskRecord, TaskError> {
        let record = TaskRecord::new(input, Utc::now());
        let mut tasks = self.write();
        if self.capacity > 0 && tasks.len() >= self.capacity {
            return Err(TaskError::CapacityExhausted {
                capacity: self.capacity,
            });
        }
        tasks.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn get(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        self.read().get(id).cloned().ok_or(TaskError::NotFound(*id))
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.read().contains_key(id)
    }

    /// Snapshot of all records, oldest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Apply `mutator` to a record under the write lock.
    fn update<T>(
        &self,
        id: &TaskId,
        mutator: impl FnOnce(&mut TaskRecord) -> T,
    ) -> Result<T, TaskError> {
        let mut tasks = self.write();
        let record = tasks.get_mut(id).ok_or(TaskError::NotFound(*id))?;
        Ok(mutator(record))
    }

    /// Remove a record; its cancellation token is fired so a queued or
    /// running worker can stop early.
    pub fn delete(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        let record = self.write().remove(id).ok_or(TaskError::NotFound(*id))?;
        record.cancel.cancel();
        Ok(record)
    }

    /// `Queued -> Running`.
    pub fn mark_running(&self, id: &TaskId) -> Result<Transition, TaskError> {
        let now = Utc::now();
        self.update(id, |record| record.mark_running(now))
    }

    /// Write a terminal state. A second terminal write is a logged no-op.
    pub fn finish(&self, id: &TaskId, outcome: TaskOutcome) -> Result<Transition, TaskError> {
        let now = Utc::now();
        let target = outcome.target_state();
        let transition = self.update(id, |record| record.finish(outcome, now))?;
        if let Transition::Ignored { current } = transition {
            tracing::warn!(
                task_id = %id,
                current = %current,
                target = %target,
                "Ignoring terminal write on task that is not running"
            );
        }
        Ok(transition)
    }

    /// Force-fail every `Running` task that started more than `grace` ago.
    pub fn recover_stale(&self, now: DateTime<Utc>, grace: Duration) -> Vec<TaskId> {
        let mut recovered = Vec::new();
        let mut tasks = self.write();
        for record in tasks.values_mut() {
            let stale = record.running_for(now).is_some_and(|running| running > grace);
            if !stale {
                continue;
            }
            let outcome = TaskOutcome::failed(FailureKind::Recovered, RECOVERED_REASON);
            if record.finish(outcome, now) == Transition::Applied {
                record.cancel.cancel();
                recovered.push(record.id);
            }
        }
        recovered
    }

    /// Remove every record created more than `window` ago, whatever its state.
    pub fn evict_older_than(&self, now: DateTime<Utc>, window: Duration) -> Vec<TaskRecord> {
        let mut tasks = self.write();
        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|record| now - record.created_at > window)
            .map(|record| record.id)
            .collect();

        expired
            .iter()
            .filter_map(|id| tasks.remove(id))
            .inspect(|record| record.cancel.cancel())
            .collect()
    }

    /// Read-only per-state counts.
    pub fn counts(&self) -> StateCounts {
        let tasks = self.read();
        let mut counts = StateCounts {
            total: tasks.len(),
            ..Default::default()
        };
        for record in tasks.values() {
            match record.state {
                TaskState::Queued => counts.queued += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::record::Artifacts;

    fn input(name: &str) -> InputRef {
        InputRef {
            filename: name.to_string(),
            size_bytes: 3,
            mime_type: None,
            ocr: false,
        }
    }

    #[test]
    fn test_create_is_visible_and_queued() {
        let registry = TaskRegistry::new();
        let record = registry.create(input("a.pdf")).unwrap();

        let fetched = registry.get(&record.id).unwrap();
        assert_eq!(fetched.state, TaskState::Queued);
        assert_eq!(fetched.input.filename, "a.pdf");
        assert!(fetched.result.is_none() && fetched.error.is_none());
    }

    #[test]
    fn test_independent_registries() {
        let a = TaskRegistry::new();
        let b = TaskRegistry::new();
        let record = a.create(input("a.pdf")).unwrap();
        assert!(a.contains(&record.id));
        assert!(!b.contains(&record.id));
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let registry = TaskRegistry::new();
        let id = TaskId::new();
        assert!(matches!(registry.get(&id), Err(TaskError::NotFound(_))));
        assert!(matches!(registry.delete(&id), Err(TaskError::NotFound(_))));
        assert!(matches!(
            registry.mark_running(&id),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn test_capacity_is_enforced() {
        let registry = TaskRegistry::with_capacity(2);
        registry.create(input("1")).unwrap();
        registry.create(input("2")).unwrap();
        let err = registry.create(input("3")).unwrap_err();
        assert!(matches!(err, TaskError::CapacityExhausted { capacity: 2 }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_delete_fires_cancellation() {
        let registry = TaskRegistry::new();
        let record = registry.create(input("a.pdf")).unwrap();
        let token = record.cancel_token();

        registry.delete(&record.id).unwrap();
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_second_terminal_write_is_ignored() {
        let registry = TaskRegistry::new();
        let id = registry.create(input("a.pdf")).unwrap().id;
        registry.mark_running(&id).unwrap();

        let first = registry
            .finish(&id, TaskOutcome::failed(FailureKind::Timeout, "timeout"))
            .unwrap();
        let second = registry
            .finish(&id, TaskOutcome::Completed(Artifacts::new()))
            .unwrap();

        assert_eq!(first, Transition::Applied);
        assert_eq!(
            second,
            Transition::Ignored {
                current: TaskState::Failed
            }
        );
        assert!(registry.get(&id).unwrap().result.is_none());
    }

    #[test]
    fn test_completed_task_cannot_reopen() {
        let registry = TaskRegistry::new();
        let id = registry.create(input("a.pdf")).unwrap().id;
        registry.mark_running(&id).unwrap();
        registry
            .finish(&id, TaskOutcome::Completed(Artifacts::new()))
            .unwrap();

        assert_eq!(
            registry.mark_running(&id).unwrap(),
            Transition::Ignored {
                current: TaskState::Completed
            }
        );
        let record = registry.get(&id).unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_recover_stale_only_touches_old_running_tasks() {
        let registry = TaskRegistry::new();
        let stale = registry.create(input("stale")).unwrap().id;
        let fresh = registry.create(input("fresh")).unwrap().id;
        let queued = registry.create(input("queued")).unwrap().id;
        registry.mark_running(&stale).unwrap();
        registry.mark_running(&fresh).unwrap();

        let long_ago = Utc::now() - Duration::seconds(700);
        registry
            .update(&stale, |record| record.started_at = Some(long_ago))
            .unwrap();

        let recovered = registry.recover_stale(Utc::now(), Duration::seconds(600));
        assert_eq!(recovered, vec![stale]);

        let record = registry.get(&stale).unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.failure, Some(FailureKind::Recovered));
        assert_eq!(record.error.as_deref(), Some(RECOVERED_REASON));
        assert!(record.cancel.is_cancelled());

        assert_eq!(registry.get(&fresh).unwrap().state, TaskState::Running);
        assert_eq!(registry.get(&queued).unwrap().state, TaskState::Queued);
    }

    #[test]
    fn test_evict_removes_old_records_in_any_state() {
        let registry = TaskRegistry::new();
        let old_running = registry.create(input("old")).unwrap().id;
        let young = registry.create(input("young")).unwrap().id;
        registry.mark_running(&old_running).unwrap();
        registry
            .update(&old_running, |record| {
                record.created_at = Utc::now() - Duration::hours(2)
            })
            .unwrap();

        let evicted = registry.evict_older_than(Utc::now(), Duration::hours(1));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, old_running);
        assert!(evicted[0].cancel.is_cancelled());

        let remaining: Vec<TaskId> = registry.list().iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec![young]);
    }

    #[test]
    fn test_counts_snapshot() {
        let registry = TaskRegistry::new();
        let a = registry.create(input("a")).unwrap().id;
        let b = registry.create(input("b")).unwrap().id;
        registry.create(input("c")).unwrap();
        registry.mark_running(&a).unwrap();
        registry.mark_running(&b).unwrap();
        registry
            .finish(&b, TaskOutcome::Completed(Artifacts::new()))
            .unwrap();

        let counts = registry.counts();
        assert_eq!(
            counts,
            StateCounts {
                queued: 1,
                running: 1,
                completed: 1,
                failed: 0,
                total: 3,
            }
        );
    }

    #[test]
    fn test_concurrent_terminal_writers_apply_once() {
        use std::sync::Arc;

        let registry = Arc::new(TaskRegistry::new());
        let id = registry.create(input("race")).unwrap().id;
        registry.mark_running(&id).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let outcome = if i % 2 == 0 {
                        TaskOutcome::Completed(Artifacts::new())
                    } else {
                        TaskOutcome::failed(FailureKind::Timeout, "timeout")
                    };
                    registry.finish(&id, outcome).unwrap()
                })
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|t| *t == Transition::Applied)
            .count();
        assert_eq!(applied, 1);
    }
}
