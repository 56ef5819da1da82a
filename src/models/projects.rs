use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::double_option;
use crate::schema::projects;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub system_prompt: Option<String>,
    /// `None` means the registry default.
    pub model: Option<String>,
    pub params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update. Outer `None` leaves a column untouched, `Some(None)`
/// clears a nullable one.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = projects)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub system_prompt: Option<Option<String>>,
    pub model: Option<Option<String>>,
    pub params: Option<Option<serde_json::Value>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProjectChanges {
    pub fn apply_to(&self, project: &mut Project) {
        if let Some(name) = &self.name {
            project.name = name.clone();
        }
        if let Some(system_prompt) = &self.system_prompt {
            project.system_prompt = system_prompt.clone();
        }
        if let Some(model) = &self.model {
            project.model = model.clone();
        }
        if let Some(params) = &self.params {
            project.params = params.clone();
        }
        if let Some(updated_at) = self.updated_at {
            project.updated_at = updated_at;
        }
    }
}

// request bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProjectView {
    pub name: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectView {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub system_prompt: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub model: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub params: Option<Option<serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_body_distinguishes_null_from_absent() {
        let view: UpdateProjectView =
            serde_json::from_str(r#"{"system_prompt": null, "name": "Renamed"}"#).unwrap();
        assert_eq!(view.name.as_deref(), Some("Renamed"));
        assert_eq!(view.system_prompt, Some(None));
        assert_eq!(view.model, None);
        assert_eq!(view.params, None);
    }
}
