//! CANON API - REST Layer
//!
//! Axum routes over the canonical entity service: cached entity reads and
//! identifier resolution, curation writes, the change feed, health probes
//! and Prometheus metrics.

#[macro_use]
mod macros;

pub mod config;
pub mod constants;
pub mod error;
pub mod extractors;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, EdgeBackendConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::{ApiCache, ApiConsumer, AppState};
pub use types::*;
