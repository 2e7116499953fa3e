//! Constants for CANON API
//!
//! Defaults for every `CANON_*` environment variable live here so they are
//! easy to find and test.

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Development server URL
pub const DEV_SERVER_URL: &str = "http://localhost:3000";

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// CHANGE FEED
// ============================================================================

/// Default number of feed partitions
pub const DEFAULT_PARTITION_COUNT: u32 = 16;

/// Default number of events retained per partition
pub const DEFAULT_RETENTION_PER_PARTITION: usize = 100_000;

/// Default page size for GET /v1/changes
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Maximum page size for GET /v1/changes
pub const MAX_PAGE_SIZE: usize = 1000;

// ============================================================================
// CACHE
// ============================================================================

/// Default hot store capacity (entries)
pub const DEFAULT_HOT_CAPACITY: usize = 10_000;

/// Default in-process edge capacity (entries)
pub const DEFAULT_EDGE_CAPACITY: usize = 100_000;

/// Default edge entry TTL in seconds
pub const DEFAULT_EDGE_TTL_SECS: u64 = 300;

/// Default `Cache-Control: max-age` on read responses, in seconds
pub const DEFAULT_EDGE_MAX_AGE_SECS: u64 = 5;

/// Default stripes in the per-key coherence gate
pub const DEFAULT_GATE_STRIPES: usize = 64;

/// Default LMDB edge cache path
pub const DEFAULT_LMDB_PATH: &str = "./data/edge-cache";

/// Default LMDB map size in megabytes
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 1024;

// ============================================================================
// CONSUMER
// ============================================================================

/// Default consumer poll interval in milliseconds
pub const DEFAULT_CONSUMER_POLL_MS: u64 = 250;

/// Default consumer batch size
pub const DEFAULT_CONSUMER_BATCH_SIZE: usize = 256;

// ============================================================================
// RETRY
// ============================================================================

/// Default number of retries for transient store errors
pub const DEFAULT_RETRY_MAX_RETRIES: u32 = 3;

/// Default initial backoff in milliseconds
pub const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 20;

/// Default backoff ceiling in milliseconds
pub const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 1000;

// ============================================================================
// HEADERS
// ============================================================================

/// Tier that served a read: `edge`, `hot` or `store`
pub const HEADER_SERVED_FROM: &str = "x-canon-served-from";

/// Consistency model of a read
pub const HEADER_CONSISTENCY: &str = "x-canon-consistency";

/// Value of [`HEADER_CONSISTENCY`] for reads served through the cache
pub const CONSISTENCY_FEED_ACKNOWLEDGED: &str = "feed-acknowledged";

/// Value of [`HEADER_CONSISTENCY`] for reads that bypassed the cache
pub const CONSISTENCY_AUTHORITATIVE: &str = "authoritative";
