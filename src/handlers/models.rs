use axum::Json;
use serde_json::{json, Value};

use crate::services::models::{default_model_id, list_models as registry};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_models() -> Json<Value> {
    Json(json!({
        "models": registry(),
        "default_model": default_model_id(),
    }))
}
