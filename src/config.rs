//! Runtime configuration and tuning constants.
//!
//! Deployment settings come from the environment; the constants below are
//! fixed policy values shared by the coordinator components.

// region:    --- Imports
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
// endregion: --- Imports

// region:    --- Constants

/// Length of the penalty applied to a winner who misses the payment deadline.
pub const PENALTY_DAYS: i64 = 30;

/// Attempts made for an operation that keeps hitting serialization conflicts.
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// First backoff delay between conflict retries (doubles on each retry).
pub const CONFLICT_RETRY_BASE_DELAY_MS: u64 = 50;

/// Buffered change events per LiveSync subscriber before it starts lagging.
pub const LIVE_SYNC_CAPACITY: usize = 1024;

/// Default step price when the creator leaves it out.
pub const DEFAULT_STEP_PRICE: i64 = 1;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_KAFKA_TOPIC: &str = "auction-changes";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;

// endregion: --- Constants

// region:    --- Config

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Settings read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; the in-memory store is used when absent.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Drop and recreate the schema on startup.
    pub database_reset: bool,
    /// Kafka bootstrap servers; the change relay is disabled when absent.
    pub kafka_brokers: Option<String>,
    pub kafka_topic: String,
    pub bind_addr: SocketAddr,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_max_connections = match non_empty("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS",
                value: v,
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let database_reset = match non_empty("DATABASE_RESET") {
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DATABASE_RESET",
                        value: v,
                    })
                }
            },
            None => false,
        };

        let bind_raw = non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let sweep_interval_ms = match non_empty("SWEEP_INTERVAL_MS") {
            Some(v) => match v.parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "SWEEP_INTERVAL_MS",
                        value: v,
                    })
                }
            },
            None => DEFAULT_SWEEP_INTERVAL_MS,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            database_max_connections,
            database_reset,
            kafka_brokers: non_empty("KAFKA_BROKERS"),
            kafka_topic: non_empty("KAFKA_TOPIC").unwrap_or_else(|| DEFAULT_KAFKA_TOPIC.to_string()),
            bind_addr,
            sweep_interval: Duration::from_millis(sweep_interval_ms),
        })
    }
}

// endregion: --- Config
