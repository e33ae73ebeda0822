//! Artifact retrieval.
//!
//! Responses follow the task state: 202 while queued or running, 500 with the
//! stored error once failed, 200 with content once completed.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::super::error::ApiError;
use super::super::AppState;
use super::parse_task_id;
use crate::analysis::{ARTIFACT_CONTENT_LIST, ARTIFACT_MARKDOWN, ARTIFACT_MIDDLE_JSON};
use crate::tasks::{ArtifactView, TaskState};

/// JSON artifacts are returned as JSON, everything else as a string.
fn artifact_value(content: String) -> Value {
    match serde_json::from_str::<Value>(&content) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(content),
    }
}

fn pending(state: TaskState) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": state,
            "message": "Task is still processing",
        })),
    )
        .into_response()
}

fn failed(error: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "status": TaskState::Failed,
            "error": error,
        })),
    )
        .into_response()
}

/// One named artifact.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((task_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    artifact_response(&state, &task_id, &name)
}

fn artifact_response(state: &AppState, task_id: &str, name: &str) -> Result<Response, ApiError> {
    let id = parse_task_id(task_id)?;
    let response = match state.controller.artifact(&id, name)? {
        ArtifactView::Pending(current) => pending(current),
        ArtifactView::Failed(error) => failed(error),
        ArtifactView::Missing => {
            return Err(ApiError::not_found(format!(
                "Artifact '{}' not found for task {}",
                name, id
            )))
        }
        ArtifactView::Ready {
            content,
            elapsed_secs,
        } => Json(json!({
            "status": TaskState::Completed,
            "task_id": id,
            "name": name,
            "content": artifact_value(content),
            "elapsed_secs": elapsed_secs,
        }))
        .into_response(),
    };
    Ok(response)
}

/// Every artifact of a completed task.
pub async fn get_artifacts(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_task_id(&task_id)?;
    let record = state.controller.get_task(&id)?;

    let response = match record.state {
        TaskState::Queued | TaskState::Running => pending(record.state),
        TaskState::Failed => failed(record.error.unwrap_or_default()),
        TaskState::Completed => {
            let artifacts: serde_json::Map<String, Value> = record
                .result
                .unwrap_or_default()
                .into_iter()
                .map(|(name, content)| (name, artifact_value(content)))
                .collect();
            Json(json!({
                "status": TaskState::Completed,
                "task_id": id,
                "artifacts": artifacts,
                "elapsed_secs": record.elapsed_secs,
            }))
            .into_response()
        }
    };
    Ok(response)
}

pub async fn get_markdown(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    artifact_response(&state, &task_id, ARTIFACT_MARKDOWN)
}

pub async fn get_content_list(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    artifact_response(&state, &task_id, ARTIFACT_CONTENT_LIST)
}

pub async fn get_middle_json(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    artifact_response(&state, &task_id, ARTIFACT_MIDDLE_JSON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_value() {
        assert_eq!(artifact_value("# Title".into()), json!("# Title"));
        assert_eq!(artifact_value("42".into()), json!("42"));
        assert_eq!(
            artifact_value(r#"[{"type":"text"}]"#.into()),
            json!([{"type": "text"}])
        );
    }
}
