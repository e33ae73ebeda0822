//! Task submission, status, listing and deletion.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::super::error::ApiError;
use super::super::AppState;
use super::parse_task_id;
use crate::storage::DEFAULT_UPLOAD_NAME;
use crate::tasks::Upload;

/// Query parameters accepted alongside an upload.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub ocr: Option<bool>,
}

fn parse_flag(value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ApiError::bad_request(format!(
            "Invalid ocr flag: {:?}",
            other
        ))),
    }
}

/// Read the `file` part (and optional `ocr` part) of a multipart upload.
async fn read_upload(mut multipart: Multipart, params: UploadParams) -> Result<Upload, ApiError> {
    let mut file = None;
    let mut ocr = params.ocr;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(DEFAULT_UPLOAD_NAME)
                    .to_string();
                let bytes = field.bytes().await?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("ocr") | Some("is_ocr") => {
                ocr = Some(parse_flag(&field.text().await?)?);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::bad_request("Missing multipart field 'file'"))?;
    Ok(Upload {
        filename,
        bytes,
        ocr: ocr.unwrap_or(true),
    })
}

/// Accept a document and schedule analysis. Responds 202 immediately.
pub async fn submit_task(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_upload(multipart, params).await?;
    let record = state.controller.submit_task(upload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": record.id,
            "status": record.state,
            "message": "Task submitted",
        })),
    ))
}

/// Accept a document and wait for the analysis to finish.
pub async fn process_and_return(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = read_upload(multipart, params).await?;
    let record = state.controller.process_and_wait(upload).await?;
    Ok(Json(record))
}

pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.list_tasks())
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;
    Ok(Json(state.controller.get_task(&id)?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;
    state.controller.delete_task(&id).await?;
    Ok(Json(json!({ "message": format!("Task {} deleted", id) })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag(" On ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
