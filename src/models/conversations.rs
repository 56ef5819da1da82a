use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{chats, messages};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = chats)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chats)]
pub struct NewChat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    /// Author for user messages, `None` for assistant replies.
    pub user_id: Option<Uuid>,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Option<Uuid>,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn user(chat_id: Uuid, user_id: Uuid, content: impl Into<String>) -> Self {
        Self::build(chat_id, Some(user_id), Role::User, content.into())
    }

    pub fn assistant(chat_id: Uuid, content: impl Into<String>) -> Self {
        Self::build(chat_id, None, Role::Assistant, content.into())
    }

    fn build(chat_id: Uuid, user_id: Option<Uuid>, role: Role, content: String) -> Self {
        NewMessage {
            id: Uuid::new_v4(),
            chat_id,
            user_id,
            role: role.as_str().to_owned(),
            content,
            created_at: Utc::now(),
        }
    }
}

// request bodies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatTitleView {
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageView {
    #[serde(default)]
    pub content: String,
}
