pub mod auth;
pub mod cancellable_sse;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod schema;
pub mod services;
pub mod state;
pub mod types;
