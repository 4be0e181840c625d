use std::{future::Future, time::Duration};

use anyhow::Result;
use ci_relay_core::{
    config::RetryConfig,
    error::{is_retryable, is_security},
};
use tokio::time::sleep;

/// Exponential backoff for `attempt` (zero based), capped at `max_delay_ms`.
pub fn backoff(policy: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(policy.initial_delay_ms.saturating_mul(factor).min(policy.max_delay_ms))
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_security(&e) => {
                tracing::error!("{} rejected: {:#}", label, e);
                return Err(e);
            }
            Err(e) if !is_retryable(&e) => {
                tracing::warn!("{} aborted: {:#}", label, e);
                return Err(e);
            }
            Err(e) if attempt + 1 >= policy.attempts => {
                tracing::error!("{} failed after {} attempts: {:?}", label, attempt + 1, e);
                return Err(e);
            }
            Err(e) => {
                let delay = backoff(policy, attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {:#}",
                    label,
                    attempt + 1,
                    policy.attempts,
                    delay,
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
