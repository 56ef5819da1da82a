use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::conversations::{Chat, ChatTitleView, Message, NewMessageView};
use crate::state::AppState;

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<Chat>), AppError> {
    // the body is optional: an empty request creates an untitled chat
    let title = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<ChatTitleView>(&body)
            .map_err(|e| AppError::bad_request("invalid_chat", e.to_string()))?
            .title
    };
    let chat = state.chats.create_chat(user_id, project_id, title).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<Chat>>, AppError> {
    Ok(Json(state.chats.list_chats(user_id, project_id).await?))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Chat>, AppError> {
    Ok(Json(state.chats.get_chat(user_id, id).await?))
}

pub async fn update_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(view): Json<ChatTitleView>,
) -> Result<Json<Chat>, AppError> {
    Ok(Json(state.chats.update_chat(user_id, id, view.title).await?))
}

pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.chats.delete_chat(user_id, id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, AppError> {
    Ok(Json(state.chats.list_messages(user_id, id).await?))
}

pub async fn create_message(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(view): Json<NewMessageView>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let message = state.chats.create_user_message(user_id, id, &view.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
