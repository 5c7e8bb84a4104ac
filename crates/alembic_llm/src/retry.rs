//! Exponential-backoff retry shared by both HTTP clients.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use alembic_engine::ProviderError;

/// Run `op` up to `max_attempts` times, doubling the delay between
/// attempts starting from `base_delay`. Permanent errors (auth, request
/// shape) are surfaced immediately; the last error is surfaced once the
/// attempts are spent.
pub(crate) async fn with_retries<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = base_delay.mul_f64(2f64.powi(attempt as i32 - 1));
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "request failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
