//! Configuration module for mathlog.
//!
//! Loads configuration from a TOML file with environment variable
//! substitution, then applies the conventional environment overrides
//! (`REDIS_URL`, `DATABASE_URL`, `SECRET_KEY`, `PORT`).
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8000
//!
//! [redis]
//! url = "redis://redis:6379"
//!
//! [auth]
//! secret_key = "${SECRET_KEY}"
//!
//! [logging]
//! channel = "logs"
//! fallback_path = "log_fallback.log"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::LOG_CHANNEL;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Log store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://data/math.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// JWT verification settings
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default)]
    pub secret_key: Option<String>,

    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            algorithm: default_algorithm(),
        }
    }
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

/// Log pipeline settings
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Pub/sub topic carrying log events
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Append-only file used when publishing fails
    #[serde(default = "default_fallback_path")]
    pub fallback_path: String,

    /// Upper bound on a single channel publish
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl LoggingConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            fallback_path: default_fallback_path(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

fn default_channel() -> String {
    LOG_CHANNEL.to_string()
}

fn default_fallback_path() -> String {
    "log_fallback.log".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    500
}

/// Worker configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: Option<String>,
}

/// Result cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

impl AppConfig {
    /// Load configuration from the default path or MATHLOG_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("MATHLOG_CONFIG").unwrap_or_else(|_| "config/mathlog.toml".to_string());

        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: AppConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            channel = %config.logging.channel,
            database = %config.database.url,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Apply environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(secret) = env::var("SECRET_KEY") {
            self.auth.secret_key = Some(secret);
        }
        if let Some(port) = env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
    }

    /// The JWT secret, required by the API server.
    pub fn secret_key(&self) -> Result<&str, ConfigError> {
        self.auth
            .secret_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField("auth.secret_key".to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.channel.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.channel must not be empty".to_string(),
            ));
        }

        if !self.redis.url.starts_with("redis://") && !self.redis.url.starts_with("rediss://") {
            return Err(ConfigError::ValidationError(
                "redis.url must start with redis:// or rediss://".to_string(),
            ));
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(ConfigError::ValidationError(
                "database.url must be an sqlite: URL".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be at least 1".to_string(),
            ));
        }

        if !matches!(self.auth.algorithm.as_str(), "HS256" | "HS384" | "HS512") {
            return Err(ConfigError::ValidationError(format!(
                "auth.algorithm '{}' is not supported",
                self.auth.algorithm
            )));
        }

        Ok(())
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    })
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}
