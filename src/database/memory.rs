use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::database::store::{Store, StoreError, StoreResult};
use crate::models::conversations::{Chat, Message, NewChat, NewMessage};
use crate::models::files::{FileRecord, NewFileRecord};
use crate::models::projects::{NewProject, Project, ProjectChanges};

#[derive(Default)]
struct Tables {
    projects: Vec<Project>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    files: Vec<FileRecord>,
}

/// Process-local store used when no database is configured, and by tests.
///
/// Rows are kept in insertion order, which is creation order.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_project(&self, project: NewProject) -> StoreResult<Project> {
        let row = Project {
            id: project.id,
            user_id: project.user_id,
            name: project.name,
            system_prompt: project.system_prompt,
            model: project.model,
            params: project.params,
            created_at: project.created_at,
            updated_at: project.updated_at,
        };
        self.tables()?.projects.push(row.clone());
        Ok(row)
    }

    async fn list_projects(&self, user_id: Uuid) -> StoreResult<Vec<Project>> {
        Ok(self
            .tables()?
            .projects
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.tables()?.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn update_project(&self, id: Uuid, changes: ProjectChanges) -> StoreResult<Option<Project>> {
        let mut tables = self.tables()?;
        Ok(tables.projects.iter_mut().find(|p| p.id == id).map(|project| {
            changes.apply_to(project);
            project.clone()
        }))
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<Vec<FileRecord>> {
        let mut tables = self.tables()?;
        let chat_ids: Vec<Uuid> = tables
            .chats
            .iter()
            .filter(|c| c.project_id == id)
            .map(|c| c.id)
            .collect();
        tables.messages.retain(|m| !chat_ids.contains(&m.chat_id));
        tables.chats.retain(|c| c.project_id != id);
        let (removed, kept): (Vec<_>, Vec<_>) =
            tables.files.drain(..).partition(|f| f.project_id == id);
        tables.files = kept;
        tables.projects.retain(|p| p.id != id);
        Ok(removed)
    }

    async fn insert_chat(&self, chat: NewChat) -> StoreResult<Chat> {
        let row = Chat {
            id: chat.id,
            user_id: chat.user_id,
            project_id: chat.project_id,
            title: chat.title,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        };
        self.tables()?.chats.push(row.clone());
        Ok(row)
    }

    async fn list_chats(&self, user_id: Uuid, project_id: Uuid) -> StoreResult<Vec<Chat>> {
        Ok(self
            .tables()?
            .chats
            .iter()
            .rev()
            .filter(|c| c.user_id == user_id && c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn find_chat(&self, id: Uuid) -> StoreResult<Option<Chat>> {
        Ok(self.tables()?.chats.iter().find(|c| c.id == id).cloned())
    }

    async fn update_chat_title(&self, id: Uuid, title: Option<String>) -> StoreResult<Option<Chat>> {
        let mut tables = self.tables()?;
        Ok(tables.chats.iter_mut().find(|c| c.id == id).map(|chat| {
            chat.title = title;
            chat.updated_at = Utc::now();
            chat.clone()
        }))
    }

    async fn delete_chat(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables()?;
        tables.messages.retain(|m| m.chat_id != id);
        let before = tables.chats.len();
        tables.chats.retain(|c| c.id != id);
        Ok(tables.chats.len() != before)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let row = Message {
            id: message.id,
            chat_id: message.chat_id,
            user_id: message.user_id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        };
        self.tables()?.messages.push(row.clone());
        Ok(row)
    }

    async fn list_messages(&self, chat_id: Uuid) -> StoreResult<Vec<Message>> {
        Ok(self
            .tables()?
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn recent_messages(&self, chat_id: Uuid, limit: usize) -> StoreResult<Vec<Message>> {
        Ok(self
            .tables()?
            .messages
            .iter()
            .rev()
            .filter(|m| m.chat_id == chat_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_file(&self, file: NewFileRecord) -> StoreResult<FileRecord> {
        let row = FileRecord {
            id: file.id,
            project_id: file.project_id,
            user_id: file.user_id,
            name: file.name,
            mime: file.mime,
            size: file.size,
            storage_locator: file.storage_locator,
            created_at: file.created_at,
        };
        self.tables()?.files.push(row.clone());
        Ok(row)
    }

    async fn list_files(&self, project_id: Uuid, limit: Option<usize>) -> StoreResult<Vec<FileRecord>> {
        Ok(self
            .tables()?
            .files
            .iter()
            .rev()
            .filter(|f| f.project_id == project_id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn find_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        Ok(self.tables()?.files.iter().find(|f| f.id == id).cloned())
    }

    async fn delete_file(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables()?;
        let before = tables.files.len();
        tables.files.retain(|f| f.id != id);
        Ok(tables.files.len() != before)
    }
}
