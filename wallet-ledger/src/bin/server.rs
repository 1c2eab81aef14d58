//! Wallet ledger bootstrap binary
//!
//! Loads configuration, connects storage and cache, ensures the schema and
//! holds the engine until shutdown. Transport layers embed the library and
//! call the engine directly.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use wallet_ledger::config::{CacheBackend, StorageBackend};
use wallet_ledger::telemetry::init_tracing;
use wallet_ledger::{
    CacheGateway, Config, LedgerEngine, LedgerStore, MemoryCache, MemoryStore, Metrics, NoopCache,
    PgStore, RedisCache,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.logging)?;

    info!(
        storage = ?config.database.backend,
        cache = ?config.cache.backend,
        "Wallet ledger starting"
    );

    let cache = connect_cache(&config).await?;
    let metrics = Metrics::new().context("Failed to create metrics")?;

    match config.database.backend {
        StorageBackend::Postgres => {
            let store = PgStore::connect(&config.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store
                .ensure_schema()
                .await
                .context("Failed to apply schema")?;
            run(store, cache, &config, metrics).await
        }
        StorageBackend::Memory => {
            info!("Using in-process storage; state is lost on exit");
            run(MemoryStore::new(), cache, &config, metrics).await
        }
    }
}

async fn connect_cache(config: &Config) -> anyhow::Result<Arc<dyn CacheGateway>> {
    let cache: Arc<dyn CacheGateway> = match config.cache.backend {
        CacheBackend::Redis => Arc::new(
            RedisCache::connect(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?,
        ),
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
        CacheBackend::Disabled => {
            info!("Cache disabled; every read goes to storage");
            Arc::new(NoopCache)
        }
    };
    Ok(cache)
}

async fn run<S: LedgerStore>(
    store: S,
    cache: Arc<dyn CacheGateway>,
    config: &Config,
    metrics: Metrics,
) -> anyhow::Result<()> {
    let engine = Arc::new(LedgerEngine::new(
        store,
        cache,
        &config.cache,
        config.engine.clone(),
        metrics,
    ));

    info!(
        operation_timeout_ms = config.engine.operation_timeout_ms,
        max_page_size = config.engine.max_page_size,
        "Wallet ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    info!("Shutting down wallet ledger");
    engine.shutdown().await;
    Ok(())
}
