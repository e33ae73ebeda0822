//! Bounded worker pool for blocking analysis work.
//!
//! Jobs run on tokio's blocking thread pool, gated by a semaphore with `size`
//! permits. Submissions never fail: when every slot is busy they wait FIFO
//! (tokio's semaphore is fair) until one frees up.
//!
//! The slot permit travels with the job's result. Whoever receives the
//! [`Completion`] decides when the slot is released, which lets the owner record
//! a terminal state before the next queued job starts. If nobody is waiting any
//! more (the owner timed out), the permit is dropped as soon as the job returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Worker panicked: {0}")]
    Panicked(String),
    #[error("Job cancelled before it started")]
    Cancelled,
    #[error("Worker pool dropped the job")]
    Lost,
}

/// Saturation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub busy: usize,
    pub queued: usize,
    /// `busy / size`, in `[0, 1]`.
    pub saturation: f64,
}

/// Fixed-size pool of execution slots.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    queued: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with `size` slots (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        let busy = self.size.saturating_sub(self.slots.available_permits());
        PoolStats {
            size: self.size,
            busy,
            queued: self.queued.load(Ordering::Relaxed),
            saturation: busy as f64 / self.size as f64,
        }
    }

    /// Submit a blocking job. It starts once a slot is free, unless `cancel`
    /// fires first. The job receives the same token and may poll it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, T>(&self, cancel: CancellationToken, job: F) -> JobHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let slots = Arc::clone(&self.slots);
        let queued = Arc::clone(&self.queued);
        let token = cancel.clone();
        queued.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = slots.acquire_owned() => permit.ok(),
            };
            queued.fetch_sub(1, Ordering::Relaxed);

            let Some(permit) = permit else {
                let _ = done_tx.send(Completion::without_slot(Err(JobError::Cancelled)));
                return;
            };

            let _ = started_tx.send(());
            let worker_token = token.clone();
            let result = tokio::task::spawn_blocking(move || job(&worker_token))
                .await
                .map_err(|e| {
                    if e.is_panic() {
                        JobError::Panicked(panic_message(e.into_panic()))
                    } else {
                        JobError::Lost
                    }
                });

            // If the receiver is gone the completion (and its permit) drops here.
            let _ = done_tx.send(Completion {
                result,
                _slot: Some(permit),
            });
        });

        JobHandle {
            started: Some(started_rx),
            done: done_rx,
            cancel,
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Output of a finished job plus the slot it ran in.
///
/// The slot is released when this value is dropped.
#[derive(Debug)]
pub struct Completion<T> {
    pub result: Result<T, JobError>,
    _slot: Option<OwnedSemaphorePermit>,
}

impl<T> Completion<T> {
    fn without_slot(result: Result<T, JobError>) -> Self {
        Self {
            result,
            _slot: None,
        }
    }
}

/// Waiting side of a submitted job.
pub struct JobHandle<T> {
    started: Option<oneshot::Receiver<()>>,
    done: oneshot::Receiver<Completion<T>>,
    cancel: CancellationToken,
}

impl<T> JobHandle<T> {
    /// Wait until the job occupies a slot. Returns `false` if it never will
    /// (cancelled while queued).
    pub async fn started(&mut self) -> bool {
        match self.started.take() {
            Some(rx) => rx.await.is_ok(),
            None => true,
        }
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Completion<T> {
        self.done
            .await
            .unwrap_or_else(|_| Completion::without_slot(Err(JobError::Lost)))
    }

    /// Wait at most `timeout`. On expiry the handle is returned untouched so the
    /// caller can cancel it or keep waiting.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<Completion<T>, Self> {
        match tokio::time::timeout(timeout, &mut self.done).await {
            Ok(completion) => {
                Ok(completion.unwrap_or_else(|_| Completion::without_slot(Err(JobError::Lost))))
            }
            Err(_) => Err(self),
        }
    }

    /// Best-effort cancellation signal. A queued job will not start; a running
    /// job only stops if it polls its token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_job_result_is_returned() {
        let pool = WorkerPool::new(2);
        let handle = pool.submit(CancellationToken::new(), |_| 21 * 2);
        assert_eq!(handle.wait().await.result, Ok(42));
    }

    #[tokio::test]
    async fn test_panics_are_captured() {
        let pool = WorkerPool::new(1);
        let handle = pool.submit(CancellationToken::new(), |_| -> u32 {
            panic!("model weights missing")
        });
        let completion = handle.wait().await;
        assert_eq!(
            completion.result,
            Err(JobError::Panicked("model weights missing".to_string()))
        );

        // The slot was released and the pool still works.
        drop(completion);
        let handle = pool.submit(CancellationToken::new(), |_| 7);
        assert_eq!(handle.wait().await.result, Ok(7));
    }

    #[tokio::test]
    async fn test_excess_jobs_queue_until_a_slot_frees() {
        let pool = WorkerPool::new(1);
        let release = Arc::new(AtomicBool::new(false));

        let gate = Arc::clone(&release);
        let mut first = pool.submit(CancellationToken::new(), move |_| {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            1
        });
        assert!(first.started().await);

        let mut second = pool.submit(CancellationToken::new(), |_| 2);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().busy, 1);
        assert_eq!(pool.stats().queued, 1);
        assert!(tokio::time::timeout(Duration::from_millis(50), second.started())
            .await
            .is_err());

        release.store(true, Ordering::SeqCst);
        let completion = first.wait().await;
        assert_eq!(completion.result, Ok(1));
        // Second job still waits while the first completion holds the slot.
        assert_eq!(pool.stats().busy, 1);
        drop(completion);

        assert!(second.started().await);
        assert_eq!(second.wait().await.result, Ok(2));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_runs() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicBool::new(false));

        let blocker_token = CancellationToken::new();
        let blocker = pool.submit(blocker_token.clone(), |token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let flag = Arc::clone(&ran);
        let queued_token = CancellationToken::new();
        let mut queued = pool.submit(queued_token.clone(), move |_| {
            flag.store(true, Ordering::SeqCst);
        });
        queued_token.cancel();

        assert!(!queued.started().await);
        assert_eq!(queued.wait().await.result, Err(JobError::Cancelled));

        blocker.cancel();
        let _ = blocker.wait().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_wait_timeout_returns_handle_on_expiry() {
        let pool = WorkerPool::new(1);
        let handle = pool.submit(CancellationToken::new(), |token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            "stopped"
        });

        let handle = match handle.wait_timeout(Duration::from_millis(30)).await {
            Ok(_) => panic!("job should still be running"),
            Err(handle) => handle,
        };
        handle.cancel();
        assert_eq!(handle.wait().await.result, Ok("stopped"));
        // The slot is free once the completion is dropped.
        assert_eq!(pool.stats().busy, 0);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
