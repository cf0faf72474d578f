//! Shared retry/backoff policy for provider requests.
//!
//! Transient failures (network errors, provider timeouts, 5xx, 429) are
//! retried with exponential backoff and full jitter. 429 gets a harsher
//! schedule starting at 2 s. A 4xx other than 429 is surfaced immediately.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::provider::{ChatOutcome, ChatRequest, ProviderAdapter, ProviderError};
use crate::stream::StreamEvent;

pub const MAX_RETRIES: u32 = 5;
pub const BASE_DELAY_SECS: f64 = 0.5;
pub const RATE_LIMIT_BASE_SECS: f64 = 2.0;

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1) +
/// uniform(0, jitter)`.
pub fn backoff_delay(attempt: u32, rate_limited: bool) -> f64 {
    let (base, jitter_max) = if rate_limited {
        (RATE_LIMIT_BASE_SECS, 1.0)
    } else {
        (BASE_DELAY_SECS, BASE_DELAY_SECS)
    };
    let jitter: f64 = rand::thread_rng().gen_range(0.0..jitter_max);
    base * 2f64.powi(attempt as i32 - 1) + jitter
}

/// Drive `adapter.send_stream` with retries, emitting `retry` /
/// `retry_exhausted` progress through `tx`.
pub async fn stream_with_retry(
    adapter: &dyn ProviderAdapter,
    req: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<ChatOutcome, ProviderError> {
    let mut last_reason = String::new();

    for attempt in 1..=MAX_RETRIES {
        match adapter.send_stream(req, tx).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if !e.is_retryable() => {
                error!(provider = adapter.name(), error = %e, "provider request failed (no retry)");
                return Err(e);
            }
            Err(e) => {
                last_reason = e.reason();
                if attempt >= MAX_RETRIES {
                    let _ = tx
                        .send(StreamEvent::RetryExhausted {
                            attempt,
                            max_retries: MAX_RETRIES,
                            reason: last_reason.clone(),
                        })
                        .await;
                    error!(
                        provider = adapter.name(),
                        attempts = attempt,
                        reason = %last_reason,
                        "provider retries exhausted"
                    );
                    return Err(ProviderError::Exhausted {
                        attempts: attempt,
                        reason: last_reason,
                    });
                }

                let delay = match &e {
                    ProviderError::RateLimited {
                        retry_after_ms: Some(ms),
                    } => (*ms as f64 / 1000.0).max(backoff_delay(attempt, true)),
                    _ => backoff_delay(attempt, e.is_rate_limited()),
                };

                warn!(
                    provider = adapter.name(),
                    attempt,
                    delay_secs = delay,
                    reason = %last_reason,
                    "provider request failed, backing off"
                );
                let _ = tx
                    .send(StreamEvent::Retry {
                        attempt,
                        max_retries: MAX_RETRIES,
                        delay_secs: (delay * 100.0).round() / 100.0,
                        reason: last_reason.clone(),
                    })
                    .await;
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
        }
    }

    Err(ProviderError::Exhausted {
        attempts: MAX_RETRIES,
        reason: last_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_backoff_grows_exponentially() {
        for attempt in 1..=4 {
            let floor = BASE_DELAY_SECS * 2f64.powi(attempt - 1);
            let d = backoff_delay(attempt as u32, false);
            assert!(d >= floor, "attempt {attempt}: {d} < {floor}");
            assert!(d < floor + BASE_DELAY_SECS + 0.001);
        }
    }

    #[test]
    fn rate_limit_backoff_starts_at_two_seconds() {
        let d = backoff_delay(1, true);
        assert!((2.0..3.0).contains(&d), "got {d}");
        let d3 = backoff_delay(3, true);
        assert!(d3 >= 8.0, "got {d3}");
    }
}
