pub mod blobs;
pub mod chats;
pub mod context;
pub mod extract;
pub mod files;
pub mod models;
pub mod openrouter;
pub mod ownership;
pub mod projects;

pub use chats::ChatService;
pub use context::ContextRetriever;
pub use files::FileService;
pub use projects::ProjectService;
