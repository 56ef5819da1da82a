use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use log::debug;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::files::FileRecord;
use crate::services::files::Upload;
use crate::state::AppState;
use crate::types::FilesQuery;

const FILE_FIELD: &str = "file";

pub async fn list_files(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.files.list_files(user_id, query.project_id).await?))
}

pub async fn upload_file(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Query(query): Query<FilesQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileRecord>), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_owned();
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_owned();
        let bytes = field.bytes().await.map_err(multipart_error)?;

        let upload = Upload {
            name,
            mime,
            bytes: bytes.to_vec(),
        };
        let file = state.files.upload_file(user_id, query.project_id, upload).await?;
        return Ok((StatusCode::CREATED, Json(file)));
    }

    Err(AppError::bad_request(
        "missing_file",
        "multipart field 'file' is required",
    ))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.files.delete_file(user_id, id).await?;
    Ok(Json(json!({ "success": true })))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::bad_request("file_too_large", e.body_text())
    } else {
        AppError::bad_request("missing_file", e.body_text())
    }
}
