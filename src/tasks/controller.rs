//! Task lifecycle controller.
//!
//! The controller is the only component that moves a task out of `Queued`,
//! and the primary writer of terminal states. Each submitted task gets a small
//! async driver that waits for a pool slot, marks the task running, waits for
//! the analyzer with the processing timeout and records the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::TaskError;
use super::pool::{JobError, JobHandle, PoolStats, WorkerPool};
use super::record::{
    ArtifactView, Artifacts, FailureKind, InputRef, TaskId, TaskOutcome, TaskRecord, Transition,
};
use super::registry::{StateCounts, TaskRegistry};
use crate::analysis::{AnalysisError, AnalysisInput, Analyzer};
use crate::storage::{sniff_mime_type, UploadStore};

/// Lifecycle knobs the controller needs.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Maximum time a task may spend `Running` before it is failed.
    pub processing_timeout: Duration,
    /// Artifacts a successful analysis must produce.
    pub required_artifacts: Vec<String>,
    /// Keep uploads and analyzer output on disk after a task finishes.
    pub keep_files: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(300),
            required_artifacts: crate::analysis::ALL_ARTIFACTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            keep_files: false,
        }
    }
}

/// A document submitted for analysis.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub ocr: bool,
}

/// Creates tasks and drives them to a terminal state.
#[derive(Clone)]
pub struct TaskController {
    registry: Arc<TaskRegistry>,
    pool: Arc<WorkerPool>,
    analyzer: Arc<dyn Analyzer>,
    store: UploadStore,
    settings: Arc<LifecycleSettings>,
}

impl TaskController {
    pub fn new(
        registry: Arc<TaskRegistry>,
        pool: Arc<WorkerPool>,
        analyzer: Arc<dyn Analyzer>,
        store: UploadStore,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            pool,
            analyzer,
            store,
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.analyzer
    }

    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Accept a document and schedule it. Returns the `Queued` record.
    pub async fn submit_task(&self, upload: Upload) -> Result<TaskRecord, TaskError> {
        let (record, _driver) = self.submit(upload).await?;
        Ok(record)
    }

    /// Submit and wait until the task is terminal. The task stays in the
    /// registry afterwards.
    pub async fn process_and_wait(&self, upload: Upload) -> Result<TaskRecord, TaskError> {
        let (record, driver) = self.submit(upload).await?;
        driver
            .await
            .map_err(|e| TaskError::Internal(format!("Task driver failed: {}", e)))?;
        self.registry.get(&record.id)
    }

    async fn submit(&self, upload: Upload) -> Result<(TaskRecord, JoinHandle<()>), TaskError> {
        if upload.bytes.is_empty() {
            return Err(TaskError::InvalidInput("uploaded file is empty".to_string()));
        }

        let input = InputRef {
            filename: upload.filename.clone(),
            size_bytes: upload.bytes.len() as u64,
            mime_type: sniff_mime_type(&upload.bytes),
            ocr: upload.ocr,
        };
        let record = self.registry.create(input)?;

        let file_path = match self
            .store
            .save_upload(&record.id, &upload.filename, &upload.bytes)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                // Roll back so a half-created task is never visible.
                let _ = self.registry.delete(&record.id);
                if let Err(cleanup) = self.store.remove(&record.id).await {
                    tracing::warn!(task_id = %record.id, "Failed to clean up after rejected upload: {}", cleanup);
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            task_id = %record.id,
            filename = %record.input.filename,
            size_bytes = record.input.size_bytes,
            ocr = record.input.ocr,
            "Task queued"
        );

        let input = AnalysisInput {
            file_path,
            output_dir: self.store.result_dir(&record.id),
            ocr: upload.ocr,
        };
        let controller = self.clone();
        let driver = tokio::spawn(controller.drive(record.id, record.cancel_token(), input));

        Ok((record, driver))
    }

    /// Run one task from slot acquisition to terminal state.
    async fn drive(self, id: TaskId, cancel: CancellationToken, input: AnalysisInput) {
        let analyzer = Arc::clone(&self.analyzer);
        let mut handle = self
            .pool
            .submit(cancel, move |token| analyzer.analyze(&input, token));

        if !handle.started().await {
            tracing::debug!(task_id = %id, "Task cancelled before it started");
            self.cleanup(&id).await;
            return;
        }

        match self.registry.mark_running(&id) {
            Ok(Transition::Applied) => tracing::info!(task_id = %id, "Task running"),
            Ok(Transition::Ignored { current }) => {
                tracing::warn!(task_id = %id, current = %current, "Task left Queued before its worker started");
                handle.cancel();
                self.cleanup(&id).await;
                self.reap_late_worker(id, handle);
                return;
            }
            Err(_) => {
                tracing::debug!(task_id = %id, "Task deleted before its worker started");
                handle.cancel();
                self.cleanup(&id).await;
                self.reap_late_worker(id, handle);
                return;
            }
        }

        let timeout = self.settings.processing_timeout;
        let (finished, late_worker) = match handle.wait_timeout(timeout).await {
            Ok(completion) => {
                let outcome = self.outcome_for(&id, completion.result);
                // The slot is still held by the rest of `completion` until the
                // end of this arm, so the next task cannot start before the write.
                (self.registry.finish(&id, outcome), None)
            }
            Err(handle) => {
                handle.cancel();
                let reason = format!("timeout: processing exceeded {}s", timeout.as_secs_f64());
                tracing::warn!(task_id = %id, timeout_secs = timeout.as_secs_f64(), "Task timed out");
                let finished = self
                    .registry
                    .finish(&id, TaskOutcome::failed(FailureKind::Timeout, reason));
                (finished, Some(handle))
            }
        };

        if finished.is_err() {
            tracing::debug!(task_id = %id, "Task deleted while running; outcome discarded");
        }
        self.cleanup(&id).await;
        if let Some(handle) = late_worker {
            self.reap_late_worker(id, handle);
        }
    }

    /// Clean up again once a worker that outlived its task returns, since it
    /// may have written into the result directory after the first cleanup.
    fn reap_late_worker<T: Send + 'static>(&self, id: TaskId, handle: JobHandle<T>) {
        let controller = self.clone();
        tokio::spawn(async move {
            let _ = handle.wait().await;
            tracing::debug!(task_id = %id, "Late worker returned");
            if controller.registry.contains(&id) {
                controller.cleanup(&id).await;
            } else if let Err(e) = controller.store.remove(&id).await {
                tracing::warn!(task_id = %id, "Failed to remove task files: {}", e);
            }
        });
    }

    /// Turn whatever the worker produced into a terminal outcome.
    fn outcome_for(
        &self,
        id: &TaskId,
        result: Result<Result<Artifacts, AnalysisError>, JobError>,
    ) -> TaskOutcome {
        let error = match result {
            Ok(Ok(artifacts)) => match self
                .settings
                .required_artifacts
                .iter()
                .find(|name| !artifacts.contains_key(*name))
            {
                None => {
                    tracing::info!(task_id = %id, artifacts = artifacts.len(), "Task completed");
                    return TaskOutcome::Completed(artifacts);
                }
                Some(name) => format!("analysis produced no '{}' artifact", name),
            },
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };

        tracing::error!(task_id = %id, "Task failed: {}", error);
        TaskOutcome::failed(FailureKind::Worker, error)
    }

    async fn cleanup(&self, id: &TaskId) {
        if self.settings.keep_files {
            return;
        }
        if let Err(e) = self.store.remove(id).await {
            tracing::warn!(task_id = %id, "Failed to remove task files: {}", e);
        }
    }

    pub fn get_task(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        self.registry.get(id)
    }

    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        self.registry.list()
    }

    /// Resolve one artifact of a task against its current state.
    pub fn artifact(&self, id: &TaskId, name: &str) -> Result<ArtifactView, TaskError> {
        Ok(self.registry.get(id)?.artifact(name))
    }

    /// Remove a task and its files. A running worker is signalled to stop.
    pub async fn delete_task(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        let record = self.registry.delete(id)?;
        tracing::info!(task_id = %id, state = %record.state, "Task deleted");
        if let Err(e) = self.store.remove(id).await {
            tracing::warn!(task_id = %id, "Failed to remove task files: {}", e);
        }
        Ok(record)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn counts(&self) -> StateCounts {
        self.registry.counts()
    }
}
