use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use env_logger::Env;
use log::{info, warn};

use kanari::config::Config;
use kanari::database::db::establish_connection;
use kanari::database::{MemoryStore, PgStore, Store};
use kanari::handlers::router;
use kanari::middleware::init_tracing;
use kanari::services::blobs::LocalBlobStore;
use kanari::services::extract::PdfTextExtractor;
use kanari::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    init_tracing()?;

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = establish_connection(url)?;
            info!("Using Postgres store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };
    if config.openrouter_api_key.is_none() {
        info!("OPENROUTER_API_KEY not set; free models stream a stub reply unless the caller sends a key");
    }

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let blobs = Arc::new(LocalBlobStore::new(config.upload_dir.clone()));

    let addr = config.bind_address.clone();
    let app_state = AppState::new(config, store, blobs, Arc::new(PdfTextExtractor));
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", &addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
