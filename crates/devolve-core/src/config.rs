// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

fn env_or(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(
    key: &'static str,
    default: &str,
    description: &'static str,
) -> Result<T, ConfigError> {
    env_or(key, default)
        .parse()
        .map_err(|_| ConfigError::Invalid(key, description))
}

/// Which durable store backs executions and users.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Volatile store for tests and local development (SQLite in-memory).
    Memory,
    /// SQLite file on disk.
    Sqlite {
        /// Path to the database file.
        filepath: String,
    },
    /// PostgreSQL.
    Postgres {
        /// Connection string.
        dsn: String,
    },
}

/// Redis connection parameters. Absent means the in-process cache is used.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Optional password.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
}

impl RedisConfig {
    /// Build the connection URL for the redis client.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => {
                format!("redis://:{}@{}:{}/{}", password, self.host, self.port, self.db)
            }
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Time-to-live settings for cached state.
#[derive(Debug, Clone)]
pub struct TtlConfig {
    /// TTL for cached execution snapshots.
    pub execution: Duration,
    /// TTL for cached result sets.
    pub result: Duration,
    /// TTL for cached progress snapshots.
    pub progress: Duration,
}

/// Executor sizing and cadence.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Worker count. Defaults to the number of logical CPUs.
    pub max_workers: usize,
    /// Bounded submission queue capacity.
    pub queue_size: usize,
    /// Minimum interval between published progress snapshots.
    pub progress_interval: Duration,
}

/// Token issuance settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Access token lifetime.
    pub access_ttl: Duration,
    /// Refresh token lifetime.
    pub refresh_ttl: Duration,
    /// HMAC signing secret.
    pub secret: String,
    /// Bcrypt work factor for password hashing.
    pub bcrypt_cost: u32,
}

/// Devolve Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Durable store selection.
    pub store: StoreConfig,
    /// Redis cache, or None to run with the in-process cache.
    pub redis: Option<RedisConfig>,
    /// Cache TTLs.
    pub ttl: TtlConfig,
    /// Executor sizing.
    pub executor: ExecutorConfig,
    /// Auth settings.
    pub auth: AuthConfig,
    /// QUIC server address for client connections.
    pub quic_addr: SocketAddr,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DEVOLVE_AUTH_SECRET`: HMAC signing secret for tokens
    /// - `DEVOLVE_SQLITE_FILEPATH` when `DEVOLVE_STORE_TYPE=sqlite`
    /// - `DEVOLVE_POSTGRES_DSN` when `DEVOLVE_STORE_TYPE=postgres`
    ///
    /// Optional (with defaults):
    /// - `DEVOLVE_STORE_TYPE`: `memory` | `sqlite` | `postgres` (default: memory)
    /// - `DEVOLVE_REDIS_HOST` / `DEVOLVE_REDIS_PORT` / `DEVOLVE_REDIS_PASSWORD` /
    ///   `DEVOLVE_REDIS_DB`: Redis connection (in-process cache when host unset)
    /// - `DEVOLVE_TTL_EXECUTION_SECS`: cached execution TTL (default: 3600)
    /// - `DEVOLVE_TTL_RESULT_SECS`: cached result TTL (default: 3600)
    /// - `DEVOLVE_TTL_PROGRESS_SECS`: cached progress TTL (default: 600)
    /// - `DEVOLVE_EXECUTOR_MAX_WORKERS`: worker count (default: CPU count)
    /// - `DEVOLVE_EXECUTOR_QUEUE_SIZE`: queue capacity (default: 128)
    /// - `DEVOLVE_EXECUTOR_PROGRESS_INTERVAL_MS`: progress cadence (default: 100)
    /// - `DEVOLVE_AUTH_ACCESS_TTL_SECS`: access token lifetime (default: 900)
    /// - `DEVOLVE_AUTH_REFRESH_TTL_SECS`: refresh token lifetime (default: 86400)
    /// - `DEVOLVE_AUTH_BCRYPT_COST`: bcrypt work factor (default: 12)
    /// - `DEVOLVE_QUIC_PORT`: QUIC server port (default: 7909)
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = match env_or("DEVOLVE_STORE_TYPE", "memory").as_str() {
            "memory" => StoreConfig::Memory,
            "sqlite" => StoreConfig::Sqlite {
                filepath: std::env::var("DEVOLVE_SQLITE_FILEPATH")
                    .map_err(|_| ConfigError::Missing("DEVOLVE_SQLITE_FILEPATH"))?,
            },
            "postgres" => StoreConfig::Postgres {
                dsn: std::env::var("DEVOLVE_POSTGRES_DSN")
                    .map_err(|_| ConfigError::Missing("DEVOLVE_POSTGRES_DSN"))?,
            },
            _ => {
                return Err(ConfigError::Invalid(
                    "DEVOLVE_STORE_TYPE",
                    "must be one of: memory, sqlite, postgres",
                ));
            }
        };

        let redis = match std::env::var("DEVOLVE_REDIS_HOST") {
            Ok(host) => Some(RedisConfig {
                host,
                port: parse_env("DEVOLVE_REDIS_PORT", "6379", "must be a valid port number")?,
                password: std::env::var("DEVOLVE_REDIS_PASSWORD").ok(),
                db: parse_env("DEVOLVE_REDIS_DB", "0", "must be an integer")?,
            }),
            Err(_) => None,
        };

        let ttl = TtlConfig {
            execution: Duration::from_secs(parse_env(
                "DEVOLVE_TTL_EXECUTION_SECS",
                "3600",
                "must be a positive integer",
            )?),
            result: Duration::from_secs(parse_env(
                "DEVOLVE_TTL_RESULT_SECS",
                "3600",
                "must be a positive integer",
            )?),
            progress: Duration::from_secs(parse_env(
                "DEVOLVE_TTL_PROGRESS_SECS",
                "600",
                "must be a positive integer",
            )?),
        };

        let default_workers = num_cpus::get().to_string();
        let executor = ExecutorConfig {
            max_workers: parse_env(
                "DEVOLVE_EXECUTOR_MAX_WORKERS",
                &default_workers,
                "must be a positive integer",
            )?,
            queue_size: parse_env(
                "DEVOLVE_EXECUTOR_QUEUE_SIZE",
                "128",
                "must be a positive integer",
            )?,
            progress_interval: Duration::from_millis(parse_env(
                "DEVOLVE_EXECUTOR_PROGRESS_INTERVAL_MS",
                "100",
                "must be a positive integer",
            )?),
        };
        if executor.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "DEVOLVE_EXECUTOR_MAX_WORKERS",
                "must be at least 1",
            ));
        }
        if executor.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "DEVOLVE_EXECUTOR_QUEUE_SIZE",
                "must be at least 1",
            ));
        }

        let secret = std::env::var("DEVOLVE_AUTH_SECRET")
            .map_err(|_| ConfigError::Missing("DEVOLVE_AUTH_SECRET"))?;
        if secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "DEVOLVE_AUTH_SECRET",
                "must be at least 32 bytes",
            ));
        }
        let auth = AuthConfig {
            access_ttl: Duration::from_secs(parse_env(
                "DEVOLVE_AUTH_ACCESS_TTL_SECS",
                "900",
                "must be a positive integer",
            )?),
            refresh_ttl: Duration::from_secs(parse_env(
                "DEVOLVE_AUTH_REFRESH_TTL_SECS",
                "86400",
                "must be a positive integer",
            )?),
            secret,
            bcrypt_cost: parse_env("DEVOLVE_AUTH_BCRYPT_COST", "12", "must be a positive integer")?,
        };

        let quic_port: u16 = parse_env("DEVOLVE_QUIC_PORT", "7909", "must be a valid port number")?;

        Ok(Self {
            store,
            redis,
            ttl,
            executor,
            auth,
            quic_addr: SocketAddr::from(([0, 0, 0, 0], quic_port)),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
