pub mod chats;
pub mod files;
pub mod models;
pub mod projects;
pub mod sse;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use log::warn;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::auth::require_auth;
use crate::middleware::{limit_requests, limit_streams, trace_requests};
use crate::state::AppState;

/// Multipart framing on top of the file bytes themselves.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Hardening headers added to every response that does not set its own.
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", "default-src 'none'; frame-ancestors 'none'"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-frame-options", "SAMEORIGIN"),
];

pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    let protected = Router::new()
        .route("/projects", post(projects::create_project).get(projects::list_projects))
        .route(
            "/projects/{id}",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/projects/{project_id}/chats",
            post(chats::create_chat).get(chats::list_chats),
        )
        .route(
            "/chats/{id}",
            get(chats::get_chat)
                .patch(chats::update_chat)
                .delete(chats::delete_chat),
        )
        .route(
            "/chats/{id}/messages",
            get(chats::list_messages).post(chats::create_message),
        )
        .route(
            "/chats/{id}/stream",
            get(sse::stream_reply)
                .layer(middleware::from_fn_with_state(state.clone(), limit_streams)),
        )
        .route("/streams/{stream_id}/cancel", post(sse::cancel_stream))
        .route(
            "/files",
            get(files::list_files)
                .post(files::upload_file)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files/{id}", delete(files::delete_file))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let mut app = Router::new()
        .route("/health", get(models::health))
        .route("/models", get(models::list_models))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), limit_requests));

    for &(name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    app.layer(cors_layer(&state.config.cors_origins))
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-openrouter-key"),
        ])
}
