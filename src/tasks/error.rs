//! Task lifecycle error types.

use thiserror::Error;

use super::record::TaskId;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Malformed or missing upload; rejected before any record exists.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Task not found: {0}")]
    NotFound(TaskId),
    #[error("Task registry is full ({capacity} tasks)")]
    CapacityExhausted { capacity: usize },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Internal(String),
}
