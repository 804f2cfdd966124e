use crate::Result;
use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use std::time::Duration;
use tracing::{debug, warn};

pub fn create_backoff(max_retries: u32, base_delay_ms: u64) -> ExponentialBackoff<backoff::SystemClock> {
    ExponentialBackoff {
        current_interval: Duration::from_millis(base_delay_ms),
        initial_interval: Duration::from_millis(base_delay_ms),
        randomization_factor: 0.5, // Add jitter
        multiplier: 2.0,
        max_interval: Duration::from_secs(60),
        max_elapsed_time: Some(Duration::from_secs(max_retries as u64 * 60)),
        ..ExponentialBackoff::default()
    }
}

/// Retries a polling cycle while it fails with retryable errors. Fatal
/// errors (config or state bugs) are returned immediately; retrying them
/// would only repeat the same failure.
pub async fn retry_cycle<F, Fut, T>(
    operation: F,
    max_retries: u32,
    base_delay_ms: u64,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = create_backoff(max_retries, base_delay_ms);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "Cycle succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() => {
                warn!(
                    operation = operation_name,
                    error = %e,
                    "Cycle failed with a non-retryable error"
                );
                return Err(e);
            }
            Err(e) => {
                if attempts >= max_retries {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %e,
                        "Cycle failed after max retries"
                    );
                    return Err(e);
                }

                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(
                            operation = operation_name,
                            attempt = attempts,
                            retry_after_ms = duration.as_millis(),
                            error = %e,
                            "Cycle failed, retrying"
                        );
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        warn!(
                            operation = operation_name,
                            attempts,
                            error = %e,
                            "Backoff exhausted"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }
}
