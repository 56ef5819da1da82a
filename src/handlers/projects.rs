use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::projects::{NewProjectView, Project, UpdateProjectView};
use crate::state::AppState;

pub async fn create_project(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(view): Json<NewProjectView>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = state.projects.create_project(user_id, view).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.projects.list_projects(user_id).await?))
}

pub async fn get_project(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(state.projects.get_project(user_id, id).await?))
}

pub async fn update_project(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(view): Json<UpdateProjectView>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(state.projects.update_project(user_id, id, view).await?))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.projects.delete_project(user_id, id).await?;
    Ok(Json(json!({ "success": true })))
}
