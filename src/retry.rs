//! Backoff policy for model provider calls
//!
//! Decides which failed Gemini requests are worth another attempt and how
//! long to wait first. The attempt loop itself lives in
//! [`GeminiClient`](crate::llm::GeminiClient).

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// `[model.retry]` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first one (0 disables retries)
    pub max_retries: u32,
    /// Wait before the first retry; doubles on each further one
    pub base_delay_ms: u64,
    /// Upper bound for any single wait, including server hints
    pub max_delay_ms: u64,
    /// Statuses treated as quota or overload rather than a bad request
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    /// A send that never got a response: refused or reset connections,
    /// DNS failures, and timeouts. Malformed requests are not retried.
    pub fn is_retryable_send_error(&self, error: &reqwest::Error) -> bool {
        error.is_connect() || error.is_timeout() || (error.is_request() && !error.is_builder())
    }

    /// Wait after `failures` failed attempts. A server hint wins over the
    /// doubling schedule; both are capped by `max_delay_ms`.
    pub fn backoff(&self, failures: u32, hint: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        let scheduled = || {
            let doublings = failures.saturating_sub(1).min(16);
            Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << doublings))
        };
        hint.unwrap_or_else(scheduled).min(cap)
    }
}

/// `Retry-After` in seconds, as Gemini sends it on 429s
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    (seconds.is_finite() && seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}
