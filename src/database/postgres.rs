use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::database::db::DbPool;
use crate::database::store::{Store, StoreError, StoreResult};
use crate::models::conversations::{Chat, Message, NewChat, NewMessage};
use crate::models::files::{FileRecord, NewFileRecord};
use crate::models::projects::{NewProject, Project, ProjectChanges};
use crate::schema::{chats, files, messages, projects};

/// Postgres-backed [`Store`]; the schema lives in `migrations/`.
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<Object<AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_project(&self, project: NewProject) -> StoreResult<Project> {
        let mut conn = self.conn().await?;
        let project = diesel::insert_into(projects::table)
            .values(&project)
            .returning(Project::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(project)
    }

    async fn list_projects(&self, user_id: Uuid) -> StoreResult<Vec<Project>> {
        let mut conn = self.conn().await?;
        let rows = projects::table
            .filter(projects::user_id.eq(user_id))
            .order(projects::created_at.desc())
            .select(Project::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn find_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        let mut conn = self.conn().await?;
        let row = projects::table
            .find(id)
            .select(Project::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn update_project(&self, id: Uuid, changes: ProjectChanges) -> StoreResult<Option<Project>> {
        let mut conn = self.conn().await?;
        let changes = ProjectChanges {
            updated_at: Some(changes.updated_at.unwrap_or_else(Utc::now)),
            ..changes
        };
        let row = diesel::update(projects::table.find(id))
            .set(&changes)
            .returning(Project::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn delete_project(&self, id: Uuid) -> StoreResult<Vec<FileRecord>> {
        let mut conn = self.conn().await?;
        let removed = files::table
            .filter(files::project_id.eq(id))
            .select(FileRecord::as_select())
            .load(&mut conn)
            .await?;
        // chats, messages and files go with the project via ON DELETE CASCADE
        diesel::delete(projects::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn insert_chat(&self, chat: NewChat) -> StoreResult<Chat> {
        let mut conn = self.conn().await?;
        let chat = diesel::insert_into(chats::table)
            .values(&chat)
            .returning(Chat::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(chat)
    }

    async fn list_chats(&self, user_id: Uuid, project_id: Uuid) -> StoreResult<Vec<Chat>> {
        let mut conn = self.conn().await?;
        let rows = chats::table
            .filter(chats::user_id.eq(user_id))
            .filter(chats::project_id.eq(project_id))
            .order(chats::created_at.desc())
            .select(Chat::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn find_chat(&self, id: Uuid) -> StoreResult<Option<Chat>> {
        let mut conn = self.conn().await?;
        let row = chats::table
            .find(id)
            .select(Chat::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn update_chat_title(&self, id: Uuid, title: Option<String>) -> StoreResult<Option<Chat>> {
        let mut conn = self.conn().await?;
        let row = diesel::update(chats::table.find(id))
            .set((chats::title.eq(title), chats::updated_at.eq(Utc::now())))
            .returning(Chat::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn delete_chat(&self, id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        diesel::delete(messages::table.filter(messages::chat_id.eq(id)))
            .execute(&mut conn)
            .await?;
        let deleted = diesel::delete(chats::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut conn = self.conn().await?;
        let message = diesel::insert_into(messages::table)
            .values(&message)
            .returning(Message::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(message)
    }

    async fn list_messages(&self, chat_id: Uuid) -> StoreResult<Vec<Message>> {
        let mut conn = self.conn().await?;
        let rows = messages::table
            .filter(messages::chat_id.eq(chat_id))
            .order(messages::created_at.asc())
            .select(Message::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn recent_messages(&self, chat_id: Uuid, limit: usize) -> StoreResult<Vec<Message>> {
        let mut conn = self.conn().await?;
        let rows = messages::table
            .filter(messages::chat_id.eq(chat_id))
            .order(messages::created_at.desc())
            .limit(limit as i64)
            .select(Message::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn insert_file(&self, file: NewFileRecord) -> StoreResult<FileRecord> {
        let mut conn = self.conn().await?;
        let file = diesel::insert_into(files::table)
            .values(&file)
            .returning(FileRecord::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(file)
    }

    async fn list_files(&self, project_id: Uuid, limit: Option<usize>) -> StoreResult<Vec<FileRecord>> {
        let mut conn = self.conn().await?;
        let rows = files::table
            .filter(files::project_id.eq(project_id))
            .order(files::created_at.desc())
            .limit(limit.map(|l| l as i64).unwrap_or(i64::MAX))
            .select(FileRecord::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn find_file(&self, id: Uuid) -> StoreResult<Option<FileRecord>> {
        let mut conn = self.conn().await?;
        let row = files::table
            .find(id)
            .select(FileRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn delete_file(&self, id: Uuid) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(files::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}
