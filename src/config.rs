//! Gateway configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration shared read-only by every service.
///
/// Every field except the JWT secret has a default, so tests and local
/// development can build one with [`Config::default`] and override fields.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Postgres URL. When absent the gateway runs on the in-memory store.
    pub database_url: Option<String>,

    pub jwt_secret: String,

    /// Server-held provider credential. Never used for paid models.
    pub openrouter_api_key: Option<String>,

    pub openrouter_base_url: String,

    /// Sent upstream as `HTTP-Referer`.
    pub public_url: String,

    /// Sent upstream as `X-Title`.
    pub app_title: String,

    pub stream_timeout: Duration,

    pub context_max_chunks: usize,

    pub context_max_chars_per_chunk: usize,

    pub max_upload_bytes: usize,

    pub upload_dir: PathBuf,

    /// Delay between canned tokens when no credential is available.
    pub stub_token_delay: Duration,

    /// Browser origins allowed to call the API with credentials.
    pub cors_origins: Vec<String>,

    /// Requests per minute per client address, across every route.
    pub rate_limit_per_minute: usize,

    /// Reply streams per minute per user.
    pub stream_rate_limit_per_minute: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_owned(),
            database_url: None,
            jwt_secret: String::new(),
            openrouter_api_key: None,
            openrouter_base_url: "https://openrouter.ai/api/v1".to_owned(),
            public_url: "http://localhost:3000".to_owned(),
            app_title: "Kanari".to_owned(),
            stream_timeout: Duration::from_millis(60_000),
            context_max_chunks: 6,
            context_max_chars_per_chunk: 1200,
            max_upload_bytes: 10 * 1024 * 1024,
            upload_dir: PathBuf::from("uploads"),
            stub_token_delay: Duration::from_millis(60),
            cors_origins: vec![
                "http://localhost:5173".to_owned(),
                "http://127.0.0.1:5173".to_owned(),
            ],
            rate_limit_per_minute: 100,
            stream_rate_limit_per_minute: 20,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?;

        Ok(Self {
            bind_address: env_or("BIND_ADDRESS", &defaults.bind_address),
            database_url: non_empty_env("DATABASE_URL"),
            jwt_secret,
            openrouter_api_key: non_empty_env("OPENROUTER_API_KEY"),
            openrouter_base_url: env_or("OPENROUTER_BASE_URL", &defaults.openrouter_base_url),
            public_url: env_or("GATEWAY_PUBLIC_URL", &defaults.public_url),
            app_title: env_or("APP_TITLE", &defaults.app_title),
            stream_timeout: Duration::from_millis(parse_env("OPENROUTER_STREAM_TIMEOUT_MS", 60_000)),
            context_max_chunks: parse_env("CONTEXT_MAX_CHUNKS", defaults.context_max_chunks),
            context_max_chars_per_chunk: parse_env(
                "CONTEXT_MAX_CHARS_PER_CHUNK",
                defaults.context_max_chars_per_chunk,
            ),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "uploads")),
            stub_token_delay: Duration::from_millis(parse_env("STUB_TOKEN_DELAY_MS", 60)),
            cors_origins: non_empty_env("CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_owned())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            stream_rate_limit_per_minute: parse_env(
                "STREAM_RATE_LIMIT_PER_MINUTE",
                defaults.stream_rate_limit_per_minute,
            ),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
