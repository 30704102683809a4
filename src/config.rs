//! Service configuration from environment variables
//!
//! Every section has a `from_env()` constructor with sensible defaults for
//! optional keys. Connection endpoints (brokers, topic, group id, database
//! URL) have no defaults and fail fast when missing.

use std::env;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration for the aggregation service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub event_processing: EventProcessingConfig,
    pub kafka: KafkaConfig,
    pub postgres: PostgresConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            event_processing: EventProcessingConfig::from_env()?,
            kafka: KafkaConfig::from_env()?,
            postgres: PostgresConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EventProcessingConfig {
    /// Seconds between periodic counter flushes
    pub flush_interval_seconds: u64,
}

impl EventProcessingConfig {
    /// Environment variables:
    /// - `FLUSH_INTERVAL_SECONDS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let flush_interval_seconds = parse_or("FLUSH_INTERVAL_SECONDS", 10)?;

        if flush_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUSH_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            flush_interval_seconds,
        })
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub enable_auto_commit: bool,
    pub auto_commit_interval_ms: u64,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    pub max_poll_interval_ms: u64,
}

impl KafkaConfig {
    /// Environment variables:
    /// - `KAFKA_BOOTSTRAP_SERVERS` (required)
    /// - `KAFKA_TOPIC` (required)
    /// - `KAFKA_GROUP_ID` (required)
    /// - `KAFKA_ENABLE_AUTO_COMMIT` (default: false)
    /// - `KAFKA_AUTO_COMMIT_INTERVAL_MS` (default: 5000)
    /// - `KAFKA_AUTO_OFFSET_RESET` (default: earliest)
    /// - `KAFKA_SESSION_TIMEOUT_MS` (default: 45000)
    /// - `KAFKA_MAX_POLL_INTERVAL_MS` (default: 300000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            bootstrap_servers: required("KAFKA_BOOTSTRAP_SERVERS")?,
            topic: required("KAFKA_TOPIC")?,
            group_id: required("KAFKA_GROUP_ID")?,
            enable_auto_commit: parse_or("KAFKA_ENABLE_AUTO_COMMIT", false)?,
            auto_commit_interval_ms: parse_or("KAFKA_AUTO_COMMIT_INTERVAL_MS", 5_000)?,
            auto_offset_reset: env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or_else(|_| "earliest".to_string()),
            session_timeout_ms: parse_or("KAFKA_SESSION_TIMEOUT_MS", 45_000)?,
            max_poll_interval_ms: parse_or("KAFKA_MAX_POLL_INTERVAL_MS", 300_000)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "KAFKA_TOPIC cannot be empty".to_string(),
            ));
        }

        match self.auto_offset_reset.as_str() {
            "earliest" | "latest" | "error" => Ok(()),
            other => Err(ConfigError::InvalidValue(format!(
                "KAFKA_AUTO_OFFSET_RESET must be earliest/latest/error, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub command_timeout_seconds: u64,
    pub max_retry_count: u32,
    pub retry_delay_seconds: u64,
    pub max_connections: u32,
}

impl PostgresConfig {
    /// Environment variables:
    /// - `DATABASE_URL` (required)
    /// - `POSTGRES_COMMAND_TIMEOUT_SECONDS` (default: 30)
    /// - `POSTGRES_MAX_RETRY_COUNT` (default: 3)
    /// - `POSTGRES_RETRY_DELAY_SECONDS` (default: 2)
    /// - `POSTGRES_MAX_CONNECTIONS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            connection_string: required("DATABASE_URL")?,
            command_timeout_seconds: parse_or("POSTGRES_COMMAND_TIMEOUT_SECONDS", 30)?,
            max_retry_count: parse_or("POSTGRES_MAX_RETRY_COUNT", 3)?,
            retry_delay_seconds: parse_or("POSTGRES_RETRY_DELAY_SECONDS", 2)?,
            max_connections: parse_or("POSTGRES_MAX_CONNECTIONS", 10)?,
        })
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVariable(name.to_string()))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{} has unparseable value '{}'", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
