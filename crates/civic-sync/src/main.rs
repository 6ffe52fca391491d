//! # Civic Sync Daemon
//!
//! Binary entry point for the write-behind sync engine.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use civic_domain::EntityRegistry;
use civic_persistence::{
    DataManager, MongoStore, MongoStoreConfig, RedisCache, RedisCacheConfig,
};
use civic_sync::{EngineConfig, SyncService, VerificationQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = EngineConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(version = civic_sync::VERSION, "Starting civic sync engine");

    // Connect Redis
    tracing::info!(url = %config.redis_url, "Connecting to Redis");
    let cache = RedisCache::new(RedisCacheConfig {
        url: config.redis_url.clone(),
    })
    .await?;
    tracing::info!("Redis connected");

    // Connect MongoDB
    tracing::info!(uri = %config.mongo_uri, database = %config.mongo_database, "Connecting to MongoDB");
    let store = MongoStore::new(MongoStoreConfig {
        uri: config.mongo_uri.clone(),
        database: config.mongo_database.clone(),
    })
    .await?;
    tracing::info!("MongoDB connected");

    let registry = Arc::new(EntityRegistry::standard());
    let store: Arc<dyn civic_persistence::DocumentStore> = Arc::new(store);
    let cache: Arc<dyn civic_persistence::CacheBackend> = Arc::new(cache);

    // Unique natural-key indexes for every registered collection
    store.ensure_indexes(&registry).await?;
    tracing::info!(collections = registry.len(), "Indexes ensured");

    let manager = Arc::new(DataManager::new(cache, store.clone(), registry));

    // Start the sync fleet
    let service = SyncService::new(manager, config.sync.clone());
    service.start();

    // Start the verification queue
    let mut verification = VerificationQueue::new(store, config.verification.clone());

    shutdown_signal().await;

    tracing::info!("Shutting down");
    service.stop().await;
    verification.stop().await;

    tracing::info!("Engine shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
