//! Configuration types

use crate::{CanonError, CanonResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn invalid(field: &str, value: impl ToString, reason: &str) -> CanonError {
    CanonError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

/// Cache tier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held by the hot store.
    pub hot_capacity: usize,
    /// Maximum number of entries held by the in-process edge tier.
    pub edge_capacity: usize,
    /// Edge entry lifetime. A safety net only; coherence comes from the feed.
    pub edge_ttl: Duration,
    /// `max-age` advertised to HTTP caches on read responses.
    pub edge_max_age: Duration,
    /// Number of lock stripes guarding per-key invalidation.
    pub gate_stripes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 10_000,
            edge_capacity: 100_000,
            edge_ttl: Duration::from_secs(300),
            edge_max_age: Duration::from_secs(5),
            gate_stripes: 64,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> CanonResult<()> {
        if self.hot_capacity == 0 {
            return Err(invalid(
                "hot_capacity",
                self.hot_capacity,
                "hot_capacity must be greater than 0",
            ));
        }
        if self.edge_capacity == 0 {
            return Err(invalid(
                "edge_capacity",
                self.edge_capacity,
                "edge_capacity must be greater than 0",
            ));
        }
        if self.edge_ttl.is_zero() {
            return Err(invalid(
                "edge_ttl",
                format!("{:?}", self.edge_ttl),
                "edge_ttl must be positive",
            ));
        }
        if self.gate_stripes == 0 {
            return Err(invalid(
                "gate_stripes",
                self.gate_stripes,
                "gate_stripes must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Change feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub partition_count: u32,
    /// Events kept per partition before the oldest are pruned.
    pub retention_per_partition: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            partition_count: 16,
            retention_per_partition: 100_000,
            default_page_size: 100,
            max_page_size: 1_000,
        }
    }
}

impl FeedConfig {
    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    pub fn validate(&self) -> CanonResult<()> {
        if self.partition_count == 0 {
            return Err(invalid(
                "partition_count",
                self.partition_count,
                "partition_count must be greater than 0",
            ));
        }
        if self.retention_per_partition == 0 {
            return Err(invalid(
                "retention_per_partition",
                self.retention_per_partition,
                "retention_per_partition must be greater than 0",
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(invalid(
                "default_page_size",
                self.default_page_size,
                "default_page_size must be in 1..=max_page_size",
            ));
        }
        Ok(())
    }
}

/// Backoff policy for transient store failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = f64::from(self.backoff_multiplier).powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn validate(&self) -> CanonResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "backoff_multiplier",
                self.backoff_multiplier,
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(invalid(
                "max_backoff",
                format!("{:?}", self.max_backoff),
                "max_backoff must not be below initial_backoff",
            ));
        }
        Ok(())
    }
}

/// Invalidation consumer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Upper bound on the wait between feed polls when no append wakes the consumer.
    pub poll_interval: Duration,
    /// Events applied per batch before checkpointing.
    pub batch_size: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            batch_size: 256,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> CanonResult<()> {
        if self.poll_interval.is_zero() {
            return Err(invalid(
                "poll_interval",
                format!("{:?}", self.poll_interval),
                "poll_interval must be positive",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid(
                "batch_size",
                self.batch_size,
                "batch_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(FeedConfig::default().validate().is_ok());
        assert!(RetryConfig::default().validate().is_ok());
        assert!(ConsumerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = CacheConfig {
            hot_capacity: 0,
            ..CacheConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            CanonError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "hot_capacity"
        ));
    }

    #[test]
    fn test_zero_edge_capacity_rejected() {
        let config = CacheConfig {
            edge_capacity: 0,
            ..CacheConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            CanonError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "edge_capacity"
        ));
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let config = FeedConfig {
            partition_count: 0,
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_page_size_is_clamped() {
        let config = FeedConfig::default();
        assert_eq!(config.page_size(None), 100);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(50_000)), 1_000);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.backoff_for(0), Duration::from_millis(10));
        assert_eq!(config.backoff_for(1), Duration::from_millis(20));
        assert_eq!(config.backoff_for(2), Duration::from_millis(40));
        assert_eq!(config.backoff_for(3), Duration::from_millis(50));
        assert_eq!(config.backoff_for(30), Duration::from_millis(50));
    }

    #[test]
    fn test_shrinking_backoff_rejected() {
        let config = RetryConfig {
            backoff_multiplier: 0.5,
            ..RetryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
