//! API Configuration Module
//!
//! Server, CORS, feed, cache, consumer and retry settings. Everything is
//! loaded from `CANON_*` environment variables with development-friendly
//! defaults from [`crate::constants`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use canon_core::{CacheConfig, ConsumerConfig, FeedConfig, RetryConfig};

use crate::constants::*;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// EDGE BACKEND
// ============================================================================

/// Which implementation backs the edge tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeBackendConfig {
    /// In-process map; lost on restart.
    Memory,
    /// Memory-mapped LMDB environment; survives restarts.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

impl EdgeBackendConfig {
    fn from_env() -> Self {
        match std::env::var("CANON_EDGE_BACKEND")
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Ok("lmdb") => EdgeBackendConfig::Lmdb {
                path: std::env::var("CANON_LMDB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_LMDB_PATH)),
                max_size_mb: env_or("CANON_LMDB_MAX_SIZE_MB", DEFAULT_LMDB_MAX_SIZE_MB),
            },
            _ => EdgeBackendConfig::Memory,
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Server
    // ========================================================================
    pub bind_host: String,
    pub port: u16,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Service
    // ========================================================================
    pub feed: FeedConfig,
    pub cache: CacheConfig,
    pub edge_backend: EdgeBackendConfig,
    pub consumer: ConsumerConfig,
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
            feed: FeedConfig {
                partition_count: DEFAULT_PARTITION_COUNT,
                retention_per_partition: DEFAULT_RETENTION_PER_PARTITION,
                default_page_size: DEFAULT_PAGE_SIZE,
                max_page_size: MAX_PAGE_SIZE,
            },
            cache: CacheConfig {
                hot_capacity: DEFAULT_HOT_CAPACITY,
                edge_capacity: DEFAULT_EDGE_CAPACITY,
                edge_ttl: Duration::from_secs(DEFAULT_EDGE_TTL_SECS),
                edge_max_age: Duration::from_secs(DEFAULT_EDGE_MAX_AGE_SECS),
                gate_stripes: DEFAULT_GATE_STRIPES,
            },
            edge_backend: EdgeBackendConfig::Memory,
            consumer: ConsumerConfig {
                poll_interval: Duration::from_millis(DEFAULT_CONSUMER_POLL_MS),
                batch_size: DEFAULT_CONSUMER_BATCH_SIZE,
            },
            retry: RetryConfig {
                max_retries: DEFAULT_RETRY_MAX_RETRIES,
                initial_backoff: Duration::from_millis(DEFAULT_RETRY_INITIAL_BACKOFF_MS),
                max_backoff: Duration::from_millis(DEFAULT_RETRY_MAX_BACKOFF_MS),
                backoff_multiplier: 2.0,
            },
        }
    }
}

/// Read an environment variable, falling back to `default` when it is unset
/// or does not parse.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CANON_API_BIND` / `CANON_API_PORT` (or `PORT`): listen address
    /// - `CANON_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `CANON_CORS_ALLOW_CREDENTIALS`, `CANON_CORS_MAX_AGE_SECS`
    /// - `CANON_PARTITIONS`, `CANON_RETENTION_PER_PARTITION`
    /// - `CANON_PAGE_SIZE`, `CANON_MAX_PAGE_SIZE`
    /// - `CANON_HOT_CAPACITY`, `CANON_EDGE_CAPACITY`, `CANON_GATE_STRIPES`
    /// - `CANON_EDGE_BACKEND` (`memory` | `lmdb`), `CANON_LMDB_PATH`, `CANON_LMDB_MAX_SIZE_MB`
    /// - `CANON_EDGE_TTL_SECS`, `CANON_EDGE_MAX_AGE_SECS`
    /// - `CANON_CONSUMER_POLL_MS`, `CANON_CONSUMER_BATCH_SIZE`
    /// - `CANON_RETRY_MAX`, `CANON_RETRY_INITIAL_BACKOFF_MS`, `CANON_RETRY_MAX_BACKOFF_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("CANON_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("CANON_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| env_or("CANON_API_PORT", DEFAULT_PORT));

        Self {
            bind_host: std::env::var("CANON_API_BIND")
                .unwrap_or_else(|_| DEFAULT_BIND_HOST.to_string()),
            port,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs: env_or("CANON_CORS_MAX_AGE_SECS", DEFAULT_CORS_MAX_AGE_SECS),
            feed: FeedConfig {
                partition_count: env_or("CANON_PARTITIONS", defaults.feed.partition_count),
                retention_per_partition: env_or(
                    "CANON_RETENTION_PER_PARTITION",
                    defaults.feed.retention_per_partition,
                ),
                default_page_size: env_or("CANON_PAGE_SIZE", defaults.feed.default_page_size),
                max_page_size: env_or("CANON_MAX_PAGE_SIZE", defaults.feed.max_page_size),
            },
            cache: CacheConfig {
                hot_capacity: env_or("CANON_HOT_CAPACITY", defaults.cache.hot_capacity),
                edge_capacity: env_or("CANON_EDGE_CAPACITY", defaults.cache.edge_capacity),
                edge_ttl: Duration::from_secs(env_or(
                    "CANON_EDGE_TTL_SECS",
                    DEFAULT_EDGE_TTL_SECS,
                )),
                edge_max_age: Duration::from_secs(env_or(
                    "CANON_EDGE_MAX_AGE_SECS",
                    DEFAULT_EDGE_MAX_AGE_SECS,
                )),
                gate_stripes: env_or("CANON_GATE_STRIPES", defaults.cache.gate_stripes),
            },
            edge_backend: EdgeBackendConfig::from_env(),
            consumer: ConsumerConfig {
                poll_interval: Duration::from_millis(env_or(
                    "CANON_CONSUMER_POLL_MS",
                    DEFAULT_CONSUMER_POLL_MS,
                )),
                batch_size: env_or("CANON_CONSUMER_BATCH_SIZE", defaults.consumer.batch_size),
            },
            retry: RetryConfig {
                max_retries: env_or("CANON_RETRY_MAX", defaults.retry.max_retries),
                initial_backoff: Duration::from_millis(env_or(
                    "CANON_RETRY_INITIAL_BACKOFF_MS",
                    DEFAULT_RETRY_INITIAL_BACKOFF_MS,
                )),
                max_backoff: Duration::from_millis(env_or(
                    "CANON_RETRY_MAX_BACKOFF_MS",
                    DEFAULT_RETRY_MAX_BACKOFF_MS,
                )),
                backoff_multiplier: defaults.retry.backoff_multiplier,
            },
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> ApiResult<()> {
        self.feed.validate()?;
        self.cache.validate()?;
        self.consumer.validate()?;
        self.retry.validate()?;
        if let EdgeBackendConfig::Lmdb { max_size_mb, .. } = &self.edge_backend {
            if *max_size_mb == 0 {
                return Err(ApiError::validation_failed(
                    "CANON_LMDB_MAX_SIZE_MB must be greater than 0",
                ));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>().map_err(|e| {
            ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
        })
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}
