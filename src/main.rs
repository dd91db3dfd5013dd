use community_forum::config::{Config, StoreBackend};
use community_forum::database::{create_pool, run_migrations};
use community_forum::redis::RedisClient;
use community_forum::services::media_service::LocalMediaStore;
use community_forum::store::{DocumentStore, MemoryStore, PgDocumentStore};
use community_forum::{AppState, create_app};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "community_forum=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(backend = ?config.store_backend, "Configuration loaded successfully");

    // Create Redis client
    let redis = match &config.redis_url {
        Some(url) => {
            let client = Arc::new(RedisClient::new(url).await?);
            tracing::info!("Redis client created");
            Some(client)
        }
        None => None,
    };

    // Create document store
    let store: Arc<dyn DocumentStore> = match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::with_max_attempts(config.transaction_max_attempts))
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres backend")?;
            let redis = redis
                .clone()
                .ok_or("REDIS_URL is required for the postgres backend")?;

            let db = create_pool(database_url).await?;
            tracing::info!("Database connection pool created");

            run_migrations(&db).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgDocumentStore::connect(db, redis, config.transaction_max_attempts).await?)
        }
    };

    // Create media store
    let media = Arc::new(LocalMediaStore::new(
        &config.upload_dir,
        &config.public_base_url,
        config.max_upload_size,
    ));

    // Create application state
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(store, media, redis, config);

    // Create application
    let app = create_app(state);

    // Create listener
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}
