//! Local retry of transient store failures.

use std::future::Future;

use canon_core::{CanonResult, RetryConfig};

/// Run `op` until it succeeds, fails permanently or runs out of retries.
///
/// Only errors whose kind is `Unavailable` are retried. Conflicts, missing
/// entities, expired cursors and validation failures return immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    mut op: F,
) -> CanonResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CanonResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation, attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = config.backoff_for(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
