//! Retry and rate-limit handling: exponential backoff with jitter for transient
//! provider errors, honoring a server's `Retry-After` when it gives one, plus a
//! proactive token-bucket pacer so a run doesn't even attempt a call it knows would be
//! rate-limited.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the retry envelope.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Whether a given error should be retried at all. Transient failures (timeouts,
/// connection resets, 429/5xx) are retryable; permanent ones (4xx other than 429,
/// malformed-request) are not.
pub fn is_retryable(error: &crate::Error) -> bool {
    match error {
        crate::Error::Timeout => true,
        crate::Error::Http(e) => e.is_timeout() || e.is_connect() || e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(true),
        crate::Error::Api(msg) => msg.contains("429") || msg.contains("500") || msg.contains("502") || msg.contains("503"),
        crate::Error::Stream(_) => true,
        _ => false,
    }
}

/// Pull a server-reported `retry-after=<seconds>` hint out of an [`crate::Error::Api`]
/// message, if the provider adapter embedded one (see `OpenAiCompatibleProvider`, which
/// formats the `Retry-After` response header this way).
fn extract_retry_after(error: &crate::Error) -> Option<Duration> {
    let crate::Error::Api(msg) = error else { return None };
    let start = msg.find("retry-after=")? + "retry-after=".len();
    let rest = &msg[start..];
    let end = rest.find('s')?;
    rest[..end].parse::<u64>().ok().map(Duration::from_secs)
}

/// Compute the delay before attempt `attempt` (0-indexed), honoring `retry_after` if the
/// server supplied one, otherwise full exponential backoff with jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d.min(config.max_delay);
    }

    let exp = config.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
    let capped = exp.min(config.max_delay.as_millis() as u64);
    let jitter = rand::thread_rng().gen_range(0..=capped.max(1) / 2);
    Duration::from_millis(capped / 2 + jitter)
}

/// Run `op` with retry, calling it again on a retryable error up to `config.max_attempts`
/// times total. `retry_after` lets the caller report a server-supplied `Retry-After`
/// header for the most recent attempt.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
) -> crate::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < config.max_attempts && is_retryable(&e) => {
                let delay = backoff_delay(config, attempt, extract_retry_after(&e));
                log::warn!(
                    "attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A sliding-window token bucket used to proactively pace outbound calls before they
/// ever hit the provider's own rate limiter.
pub struct RateLimiter {
    capacity: f64,
    tokens: Mutex<(f64, Instant)>,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: Mutex::new((capacity, Instant::now())),
            refill_per_sec,
        }
    }

    /// Block until at least one token is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut guard = self.tokens.lock().await;
                let (tokens, last) = &mut *guard;
                let now = Instant::now();
                let elapsed = now.duration_since(*last).as_secs_f64();
                *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
                *last = now;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - *tokens) / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}
