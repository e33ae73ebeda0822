//! HTTP request handlers for the web server.

mod artifacts;
mod status;
mod tasks;

pub use artifacts::{get_artifact, get_artifacts, get_content_list, get_markdown, get_middle_json};
pub use status::{gpu_status, health, index};
pub use tasks::{delete_task, get_task, list_tasks, process_and_return, submit_task};

use super::error::ApiError;
use crate::tasks::TaskId;

/// Malformed ids can never name a task, so they are reported as not found.
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Task not found: {}", raw)))
}
