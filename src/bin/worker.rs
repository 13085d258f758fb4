//! mathlog log worker.
//!
//! Subscribes to the log channel and persists every event into SQLite.
//! Exits non-zero when Redis is unreachable or drops the subscription, so
//! the supervisor can restart it.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_URL`: Redis connection string
//! - `DATABASE_URL`: SQLite URL of the log store
//! - `MATHLOG_WORKER_NAME`: Worker identifier, overrides `worker.name` (default: hostname or UUID)
//! - `RUST_LOG`: Logging level (default: "info,sqlx=warn")

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use mathlog::channel::RedisChannel;
use mathlog::config::AppConfig;
use mathlog::shutdown::ShutdownSignal;
use mathlog::store::{self, SqliteLogStore};
use mathlog::telemetry;
use mathlog::worker::LogWorker;

/// Worker name from environment, config, hostname, or a fresh UUID.
fn worker_name(config: &AppConfig) -> String {
    if let Ok(name) = env::var("MATHLOG_WORKER_NAME") {
        return name;
    }
    if let Some(name) = config.worker.name.clone() {
        return name;
    }

    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("log-worker-{}", name);
        }
    }

    format!("log-worker-{}", uuid::Uuid::new_v4())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Log worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let name = worker_name(&config);

    info!(worker = %name, channel = %config.logging.channel, "Log worker starting");

    // Unlike the API, the worker cannot do anything without Redis.
    let channel = RedisChannel::connect(&config.redis).await?;

    let pool = store::connect(&config.database.url, config.database.max_connections).await?;
    let store = SqliteLogStore::new(pool);

    let shutdown = ShutdownSignal::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.listen_for_signals().await }
    });

    let mut worker = LogWorker::new(Arc::new(channel), store, config.logging.channel.clone())
        .with_name(name);
    let stats = worker.run(&shutdown).await?;

    info!(
        received = stats.received,
        persisted = stats.persisted,
        malformed = stats.malformed,
        failed = stats.failed,
        "Log worker exited"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_name_env_overrides_config() {
        let mut config = AppConfig::default();
        config.worker.name = Some("from-config".to_string());

        env::remove_var("MATHLOG_WORKER_NAME");
        assert_eq!(worker_name(&config), "from-config");

        env::set_var("MATHLOG_WORKER_NAME", "from-env");
        assert_eq!(worker_name(&config), "from-env");
        env::remove_var("MATHLOG_WORKER_NAME");

        config.worker.name = None;
        assert!(worker_name(&config).starts_with("log-worker-"));
    }
}
