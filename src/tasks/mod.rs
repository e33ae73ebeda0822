//! Task lifecycle management.
//!
//! A task moves `Queued -> Running -> Completed | Failed`:
//!
//! - [`TaskRegistry`] owns every record and serialises state writes
//! - [`WorkerPool`] runs blocking analysis off the async runtime, `N` at a time
//! - [`TaskController`] creates tasks, drives them through the pool and writes
//!   the terminal state (including the processing timeout)
//! - [`RecoverySweeper`] force-fails tasks stuck in `Running`
//! - [`RetentionSweeper`] evicts records older than the retention window

mod controller;
mod error;
mod pool;
mod record;
mod registry;
mod sweeper;

pub use controller::{LifecycleSettings, TaskController, Upload};
pub use error::TaskError;
pub use pool::{Completion, JobError, JobHandle, PoolStats, WorkerPool};
pub use record::{
    ArtifactView, Artifacts, FailureKind, InputRef, TaskId, TaskOutcome, TaskRecord, TaskState,
    Transition,
};
pub use registry::{StateCounts, TaskRegistry, RECOVERED_REASON};
pub use sweeper::{spawn_periodic, RecoverySweeper, RetentionSweeper, Sweep, SweeperHandle};
