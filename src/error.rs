//! Gateway error taxonomy.
//!
//! Every service returns `Result<T, AppError>`. The HTTP layer turns an
//! `AppError` into a JSON body `{"error": <code>, "message": <text>}` where
//! `code` is a stable machine-readable string clients can branch on.
//! Store and blob failures are logged with full detail and reported to the
//! caller as a generic `internal_error`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::database::store::StoreError;
use crate::services::blobs::BlobError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing resource, or a project/chat owned by someone else.
    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("bad request: {code}: {detail}")]
    BadRequest { code: &'static str, detail: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(&'static str),

    #[error("too many requests")]
    RateLimited,

    /// Non-2xx or bodyless response from the LLM provider.
    #[error("openrouter_error: {status} {body}")]
    Upstream { status: u16, body: String },

    /// Transport failure talking to the provider (connect, reset, TLS).
    #[error("openrouter_error: {0}")]
    UpstreamTransport(String),

    #[error("openrouter_stream_timeout")]
    UpstreamTimeout,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::BadRequest {
            code,
            detail: detail.into(),
        }
    }

    pub fn invalid_model(model: &str) -> Self {
        AppError::bad_request("invalid_model", format!("model '{model}' is not supported"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(code) | AppError::Forbidden(code) | AppError::Conflict(code) => code,
            AppError::BadRequest { code, .. } => code,
            AppError::Unauthorized => "unauthorized",
            AppError::RateLimited => "rate_limited",
            AppError::Upstream { .. } | AppError::UpstreamTransport(_) => "openrouter_error",
            AppError::UpstreamTimeout => "openrouter_stream_timeout",
            AppError::Store(_) | AppError::Blob(_) | AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream { .. } | AppError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Store(_) | AppError::Blob(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand to a client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Store(e) => {
                error!("store error: {e}");
                "internal server error".to_owned()
            }
            AppError::Blob(e) => {
                error!("blob storage error: {e}");
                "internal server error".to_owned()
            }
            AppError::Internal(m) => {
                error!("internal error: {m}");
                "internal server error".to_owned()
            }
            other => other.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({ "error": self.code(), "message": self.public_message() })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_json())).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        error!("converting anyhow error to AppError::Internal: {e:?}");
        AppError::Internal(e.to_string())
    }
}
