//! Response headers for cache-eligible reads.
//!
//! Every read carries its version as a strong ETag plus the provenance of
//! the value. A request whose `If-None-Match` already names the current
//! version gets `304 Not Modified` with no body.

use std::time::Duration;

use axum::{
    http::{
        header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use canon_core::{ReadConsistency, Version};
use canon_storage::CacheRead;
use serde::Serialize;

use crate::constants::{
    CONSISTENCY_AUTHORITATIVE, CONSISTENCY_FEED_ACKNOWLEDGED, HEADER_CONSISTENCY,
    HEADER_SERVED_FROM,
};
use crate::error::{ApiError, ApiResult};

pub fn etag_for(version: Version) -> String {
    format!("\"v{}\"", version)
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Weak validators compare equal to their strong form, as the weak
/// comparison function requires for GET.
fn matches_if_none_match(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::internal_error(format!("Invalid header value {}: {}", value, e)))
}

/// Build the response for a read through the coherence layer.
pub fn read_response<T: Serialize>(
    request_headers: &HeaderMap,
    read: CacheRead<T>,
    consistency: ReadConsistency,
    edge_max_age: Duration,
) -> ApiResult<Response> {
    let etag = etag_for(read.version());

    let mut headers = HeaderMap::new();
    headers.insert(ETAG, header_value(&etag)?);
    let cache_control = match consistency {
        ReadConsistency::Acknowledged => {
            format!("public, max-age={}", edge_max_age.as_secs())
        }
        ReadConsistency::Authoritative => "no-cache".to_string(),
    };
    headers.insert(CACHE_CONTROL, header_value(&cache_control)?);
    headers.insert(HEADER_SERVED_FROM, header_value(read.served_from().as_str())?);
    headers.insert(
        HEADER_CONSISTENCY,
        HeaderValue::from_static(match consistency {
            ReadConsistency::Acknowledged => CONSISTENCY_FEED_ACKNOWLEDGED,
            ReadConsistency::Authoritative => CONSISTENCY_AUTHORITATIVE,
        }),
    );

    let not_modified = request_headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| matches_if_none_match(v, &etag));
    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    Ok((StatusCode::OK, headers, Json(read.into_value())).into_response())
}
