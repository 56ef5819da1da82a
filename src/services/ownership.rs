//! Read-only ownership checks run before every project, chat, message and
//! file operation.
//!
//! Chat and message paths report a foreign project or chat exactly like a
//! missing one (`NotFound`) so ids cannot be probed through them. Project
//! CRUD and file operations distinguish `NotFound` from `Forbidden`.

use uuid::Uuid;

use crate::database::Store;
use crate::error::AppError;
use crate::models::conversations::Chat;
use crate::models::files::FileRecord;
use crate::models::projects::Project;

pub async fn assert_project_owned(
    store: &dyn Store,
    user_id: Uuid,
    project_id: Uuid,
) -> Result<Project, AppError> {
    match store.find_project(project_id).await? {
        Some(project) if project.user_id == user_id => Ok(project),
        _ => Err(AppError::NotFound("project_not_found")),
    }
}

pub async fn assert_chat_owned(
    store: &dyn Store,
    user_id: Uuid,
    chat_id: Uuid,
) -> Result<Chat, AppError> {
    match store.find_chat(chat_id).await? {
        Some(chat) if chat.user_id == user_id => Ok(chat),
        _ => Err(AppError::NotFound("chat_not_found")),
    }
}

pub async fn assert_project_access(
    store: &dyn Store,
    user_id: Uuid,
    project_id: Uuid,
) -> Result<Project, AppError> {
    let project = store
        .find_project(project_id)
        .await?
        .ok_or(AppError::NotFound("project_not_found"))?;
    if project.user_id != user_id {
        return Err(AppError::Forbidden("forbidden"));
    }
    Ok(project)
}

pub async fn assert_file_access(
    store: &dyn Store,
    user_id: Uuid,
    file_id: Uuid,
) -> Result<FileRecord, AppError> {
    let file = store
        .find_file(file_id)
        .await?
        .ok_or(AppError::NotFound("file_not_found"))?;
    if file.user_id != user_id {
        return Err(AppError::Forbidden("forbidden"));
    }
    Ok(file)
}
