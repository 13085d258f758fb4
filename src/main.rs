//! mathlog API server.
//!
//! ## Configuration
//!
//! Read from `config/mathlog.toml` (or `MATHLOG_CONFIG`), with overrides:
//! - `REDIS_URL`: Redis connection string
//! - `DATABASE_URL`: SQLite URL of the log store
//! - `SECRET_KEY`: JWT verification secret (required)
//! - `PORT`: Listen port (default: 8000)
//! - `RUST_LOG`: Logging level (default: "info,sqlx=warn")

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use mathlog::api::{auth::JwtVerifier, build_router, AppState};
use mathlog::cache::RedisCache;
use mathlog::channel::RedisChannel;
use mathlog::config::AppConfig;
use mathlog::fallback::FallbackSink;
use mathlog::publisher::Publisher;
use mathlog::shutdown::ShutdownSignal;
use mathlog::store::{self, LogStore, SqliteLogStore};
use mathlog::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let config = AppConfig::load()?;
    let verifier = JwtVerifier::new(config.secret_key()?, &config.auth.algorithm)?;

    // Redis is lazy here: publishes fall back to the file while it is down.
    let channel = RedisChannel::new(&config.redis)?;
    if let Err(e) = channel.ping().await {
        warn!(url = %config.redis.url, error = %e, "Redis unreachable, log events will use the fallback file");
    }
    let cache = RedisCache::new(channel.pool().clone());

    let pool = store::connect(&config.database.url, config.database.max_connections).await?;
    let log_store = SqliteLogStore::new(pool);
    log_store.ensure_schema().await?;

    let publisher = Publisher::new(
        Arc::new(channel),
        FallbackSink::new(&config.logging.fallback_path),
    )
    .with_timeout(config.logging.publish_timeout());

    let state = Arc::new(AppState {
        publisher: Arc::new(publisher),
        log_channel: config.logging.channel.clone(),
        cache: Arc::new(cache),
        cache_ttl: config.cache.ttl(),
        store: Arc::new(log_store),
        verifier,
    });
    let app = build_router(state);

    let shutdown = ShutdownSignal::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.listen_for_signals().await }
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, channel = %config.logging.channel, "mathlog API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("mathlog API stopped");
    Ok(())
}
