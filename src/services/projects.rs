use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::database::Store;
use crate::error::AppError;
use crate::models::projects::{NewProject, NewProjectView, Project, ProjectChanges, UpdateProjectView};
use crate::services::blobs::BlobStore;
use crate::services::models::is_known_model;
use crate::services::ownership::assert_project_access;

const MAX_NAME_CHARS: usize = 120;
const MAX_SYSTEM_PROMPT_CHARS: usize = 20_000;
const MAX_MODEL_CHARS: usize = 200;

pub struct ProjectService {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub async fn create_project(&self, user_id: Uuid, view: NewProjectView) -> Result<Project, AppError> {
        validate_name(&view.name)?;
        if let Some(prompt) = &view.system_prompt {
            validate_system_prompt(prompt)?;
        }
        if let Some(model) = &view.model {
            validate_model(model)?;
        }
        if let Some(params) = &view.params {
            validate_params(params)?;
        }

        let now = Utc::now();
        let project = self
            .store
            .insert_project(NewProject {
                id: Uuid::new_v4(),
                user_id,
                name: view.name,
                system_prompt: view.system_prompt,
                model: view.model,
                params: view.params,
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!("Created project {} for user {}", project.id, user_id);
        Ok(project)
    }

    pub async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, AppError> {
        Ok(self.store.list_projects(user_id).await?)
    }

    pub async fn get_project(&self, user_id: Uuid, project_id: Uuid) -> Result<Project, AppError> {
        assert_project_access(self.store.as_ref(), user_id, project_id).await
    }

    pub async fn update_project(
        &self,
        user_id: Uuid,
        project_id: Uuid,
        view: UpdateProjectView,
    ) -> Result<Project, AppError> {
        assert_project_access(self.store.as_ref(), user_id, project_id).await?;

        if let Some(name) = &view.name {
            validate_name(name)?;
        }
        if let Some(Some(prompt)) = &view.system_prompt {
            validate_system_prompt(prompt)?;
        }
        if let Some(Some(model)) = &view.model {
            validate_model(model)?;
        }
        if let Some(Some(params)) = &view.params {
            validate_params(params)?;
        }

        let changes = ProjectChanges {
            name: view.name,
            system_prompt: view.system_prompt,
            model: view.model,
            params: view.params,
            updated_at: Some(Utc::now()),
        };
        self.store
            .update_project(project_id, changes)
            .await?
            .ok_or(AppError::NotFound("project_not_found"))
    }

    /// Deletes the project with its chats and files. Blob cleanup is best
    /// effort: a blob that cannot be removed is logged and left behind.
    pub async fn delete_project(&self, user_id: Uuid, project_id: Uuid) -> Result<(), AppError> {
        assert_project_access(self.store.as_ref(), user_id, project_id).await?;
        let files = self.store.delete_project(project_id).await?;
        for file in &files {
            if let Err(e) = self.blobs.remove(&file.storage_locator).await {
                warn!("Failed to remove blob for file {} of project {}: {e}", file.id, project_id);
            }
        }
        info!("Deleted project {} ({} files)", project_id, files.len());
        Ok(())
    }
}

fn invalid(detail: impl Into<String>) -> AppError {
    AppError::bad_request("invalid_project", detail)
}

fn validate_name(name: &str) -> Result<(), AppError> {
    let chars = name.chars().count();
    if name.trim().is_empty() || chars > MAX_NAME_CHARS {
        return Err(invalid(format!("name must be 1 to {MAX_NAME_CHARS} characters")));
    }
    Ok(())
}

fn validate_system_prompt(prompt: &str) -> Result<(), AppError> {
    if prompt.chars().count() > MAX_SYSTEM_PROMPT_CHARS {
        return Err(invalid(format!(
            "system_prompt must be at most {MAX_SYSTEM_PROMPT_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_model(model: &str) -> Result<(), AppError> {
    if model.chars().count() > MAX_MODEL_CHARS {
        return Err(invalid(format!("model must be at most {MAX_MODEL_CHARS} characters")));
    }
    if !is_known_model(model) {
        return Err(AppError::invalid_model(model));
    }
    Ok(())
}

fn validate_params(params: &Value) -> Result<(), AppError> {
    if !params.is_object() {
        return Err(invalid("params must be a JSON object"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::files::NewFileRecord;
    use crate::services::blobs::LocalBlobStore;
    use serde_json::json;

    fn view(name: &str) -> NewProjectView {
        NewProjectView {
            name: name.into(),
            system_prompt: None,
            model: None,
            params: None,
        }
    }

    fn service(dir: &tempfile::TempDir) -> (Arc<MemoryStore>, Arc<LocalBlobStore>, ProjectService) {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path()));
        let svc = ProjectService::new(store.clone(), blobs.clone());
        (store, blobs, svc)
    }

    #[tokio::test]
    async fn create_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, svc) = service(&dir);
        let user = Uuid::new_v4();

        let cases = [
            (view(""), "invalid_project"),
            (view(&"n".repeat(121)), "invalid_project"),
            (
                NewProjectView { model: Some("acme/unknown".into()), ..view("ok") },
                "invalid_model",
            ),
            (
                NewProjectView { params: Some(json!([1, 2])), ..view("ok") },
                "invalid_project",
            ),
            (
                NewProjectView { system_prompt: Some("p".repeat(20_001)), ..view("ok") },
                "invalid_project",
            ),
        ];
        for (input, code) in cases {
            assert_eq!(svc.create_project(user, input).await.unwrap_err().code(), code);
        }

        let project = svc
            .create_project(
                user,
                NewProjectView {
                    model: Some("openai/gpt-5-nano".into()),
                    params: Some(json!({"temperature": 0.2})),
                    ..view(&"n".repeat(120))
                },
            )
            .await
            .unwrap();
        assert_eq!(project.model.as_deref(), Some("openai/gpt-5-nano"));
    }

    #[tokio::test]
    async fn update_clears_and_sets_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, svc) = service(&dir);
        let user = Uuid::new_v4();
        let project = svc
            .create_project(
                user,
                NewProjectView { system_prompt: Some("old".into()), ..view("p") },
            )
            .await
            .unwrap();

        let updated = svc
            .update_project(
                user,
                project.id,
                UpdateProjectView {
                    name: Some("renamed".into()),
                    system_prompt: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.system_prompt, None);

        let err = svc
            .update_project(
                user,
                project.id,
                UpdateProjectView { model: Some(Some("nope".into())), ..Default::default() },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_model");
    }

    #[tokio::test]
    async fn foreign_project_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, svc) = service(&dir);
        let owner = Uuid::new_v4();
        let project = svc.create_project(owner, view("mine")).await.unwrap();

        let err = svc.get_project(Uuid::new_v4(), project.id).await.unwrap_err();
        assert_eq!(err.code(), "forbidden");
        let err = svc.delete_project(owner, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "project_not_found");
        assert!(svc.list_projects(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let (store, blobs, svc) = service(&dir);
        let user = Uuid::new_v4();
        let project = svc.create_project(user, view("p")).await.unwrap();
        let locator = blobs.put(b"data").await.unwrap();
        store
            .insert_file(NewFileRecord {
                id: Uuid::new_v4(),
                project_id: project.id,
                user_id: user,
                name: "a.txt".into(),
                mime: "text/plain".into(),
                size: 4,
                storage_locator: locator.clone(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        svc.delete_project(user, project.id).await.unwrap();
        assert!(blobs.get(&locator).await.is_err());
        assert!(store.find_project(project.id).await.unwrap().is_none());
    }
}
