//! Bounded retry with fixed or exponential backoff, honouring a deadline.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::AgentError;

/// Retries `op` up to `config.max_retries` additional times while the error
/// is retryable and the `deadline` has not passed, waiting `base_delay` (or
/// `base_delay * 2^attempt` when `exponential`) between attempts.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    deadline: Instant,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = op().await;
        match result {
            Ok(v) => return Ok(v),
            Err(err) if err.is_retryable() && attempt < config.max_retries && Instant::now() < deadline => {
                let delay = if config.exponential {
                    config.base_delay * 2u32.pow(attempt)
                } else {
                    config.base_delay
                };
                let remaining = deadline.saturating_duration_since(Instant::now());
                let sleep_for = delay.min(remaining);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Canceled),
                    _ = tokio::time::sleep(sleep_for) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
