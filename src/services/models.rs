//! Model allowlist: the single source of truth for which model ids projects
//! may select and which of them are billed to the caller's own key.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Free,
    Paid,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub label: &'static str,
    #[serde(rename = "access")]
    pub tier: ModelTier,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo { id: "deepseek/deepseek-chat-v3.1:free", label: "DeepSeek Chat v3.1 (Free)", tier: ModelTier::Free },
    ModelInfo { id: "google/gemini-2.0-flash-exp:free", label: "Gemini 2.0 Flash Exp (Free)", tier: ModelTier::Free },
    ModelInfo { id: "minimax/minimax-m2:free", label: "Minimax M2 (Free)", tier: ModelTier::Free },
    ModelInfo { id: "z-ai/glm-4.5-air:free", label: "GLM 4.5 Air (Free)", tier: ModelTier::Free },
    ModelInfo { id: "google/gemini-2.5-flash-lite", label: "Gemini 2.5 Flash Lite (Paid)", tier: ModelTier::Paid },
    ModelInfo { id: "google/gemini-2.0-flash-lite-001", label: "Gemini 2.0 Flash Lite 001 (Paid)", tier: ModelTier::Paid },
    ModelInfo { id: "openai/gpt-5-nano", label: "GPT-5 Nano (Paid)", tier: ModelTier::Paid },
];

pub const DEFAULT_MODEL_ID: &str = "deepseek/deepseek-chat-v3.1:free";

pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

pub fn default_model_id() -> &'static str {
    DEFAULT_MODEL_ID
}

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.id == id)
}

pub fn is_known_model(id: &str) -> bool {
    find_model(id).is_some()
}

/// Strict allowlist membership: unknown ids are neither paid nor free.
pub fn is_paid_model(id: &str) -> bool {
    matches!(find_model(id), Some(m) if m.tier == ModelTier::Paid)
}

pub fn is_free_model(id: &str) -> bool {
    matches!(find_model(id), Some(m) if m.tier == ModelTier::Free)
}
