use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::conversations::{Chat, Message, NewChat, NewMessage};
use crate::models::files::{FileRecord, NewFileRecord};
use crate::models::projects::{NewProject, Project, ProjectChanges};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator. Every call is independent; nothing here runs
/// inside a transaction spanning calls.
///
/// Lists named "recent" or ordered by recency return newest first, message
/// history returns oldest first.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_project(&self, project: NewProject) -> StoreResult<Project>;
    async fn list_projects(&self, user_id: Uuid) -> StoreResult<Vec<Project>>;
    async fn find_project(&self, id: Uuid) -> StoreResult<Option<Project>>;
    async fn update_project(&self, id: Uuid, changes: ProjectChanges) -> StoreResult<Option<Project>>;
    /// Deletes the project with its chats, messages and file records.
    /// Returns the removed file records so their blobs can be cleaned up.
    async fn delete_project(&self, id: Uuid) -> StoreResult<Vec<FileRecord>>;

    async fn insert_chat(&self, chat: NewChat) -> StoreResult<Chat>;
    async fn list_chats(&self, user_id: Uuid, project_id: Uuid) -> StoreResult<Vec<Chat>>;
    async fn find_chat(&self, id: Uuid) -> StoreResult<Option<Chat>>;
    async fn update_chat_title(&self, id: Uuid, title: Option<String>) -> StoreResult<Option<Chat>>;
    /// Deletes the chat and its messages.
    async fn delete_chat(&self, id: Uuid) -> StoreResult<bool>;

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;
    async fn list_messages(&self, chat_id: Uuid) -> StoreResult<Vec<Message>>;
    async fn recent_messages(&self, chat_id: Uuid, limit: usize) -> StoreResult<Vec<Message>>;

    async fn insert_file(&self, file: NewFileRecord) -> StoreResult<FileRecord>;
    async fn list_files(&self, project_id: Uuid, limit: Option<usize>) -> StoreResult<Vec<FileRecord>>;
    async fn find_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>>;
    async fn delete_file(&self, id: Uuid) -> StoreResult<bool>;
}
