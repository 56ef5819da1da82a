use std::sync::Arc;

use axum::extract::FromRef;

use crate::cancellable_sse::SseState;
use crate::config::Config;
use crate::database::Store;
use crate::middleware::RateLimiter;
use crate::services::blobs::BlobStore;
use crate::services::extract::TextExtractor;
use crate::services::openrouter::OpenRouterClient;
use crate::services::{ChatService, ContextRetriever, FileService, ProjectService};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sse_state: SseState,
    pub chats: Arc<ChatService>,
    pub projects: Arc<ProjectService>,
    pub files: Arc<FileService>,
    #[from_ref(skip)]
    pub request_limiter: RateLimiter,
    #[from_ref(skip)]
    pub stream_limiter: RateLimiter,
}

impl AppState {
    /// Wires every service over the given collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let config = Arc::new(config);
        let context = Arc::new(ContextRetriever::new(
            store.clone(),
            blobs.clone(),
            extractor,
            config.context_max_chunks,
            config.context_max_chars_per_chunk,
        ));
        let openrouter = OpenRouterClient::new(reqwest::Client::new(), &config);

        Self {
            sse_state: SseState::new(),
            request_limiter: RateLimiter::per_minute(config.rate_limit_per_minute),
            stream_limiter: RateLimiter::per_minute(config.stream_rate_limit_per_minute),
            chats: Arc::new(ChatService::new(
                store.clone(),
                context,
                openrouter,
                config.clone(),
            )),
            projects: Arc::new(ProjectService::new(store.clone(), blobs.clone())),
            files: Arc::new(FileService::new(store, blobs, config.max_upload_bytes)),
            config,
        }
    }
}
