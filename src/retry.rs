//! Exponential-backoff retry helper shared by the LP client and the intermediary
//! registry.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use std::future::Future;

/// Run `f` up to `config.retry_max_attempts` times, backing off exponentially
/// between attempts, unless the error reports itself as non-retryable
/// ([`Error::is_retryable`]) or `cancel` fires first.
pub async fn with_retry<T, F, Fut>(config: &EngineConfig, cancel: &CancelToken, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = config.retry_base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(Error::CancellationError);
        }
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= config.retry_max_attempts || !err.is_retryable() => {
                return Err(err);
            }
            Err(err) => {
                log::warn!(
                    "attempt {attempt}/{} failed, retrying in {delay:?}: {err}",
                    config.retry_max_attempts
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::CancellationError),
                }
                delay = delay.mul_f64(config.retry_multiplier);
            }
        }
    }
}
