//! Failure classification and backoff timing for the transport retry loop.

use std::time::Duration;

use crate::error::ClientError;
use crate::model::MarketoError;

/// Vendor codes that signal the shared rate budget or concurrency ceiling
/// was hit; safe to retry after backing off.
const RATE_LIMIT_CODES: [&str; 2] = ["606", "615"];

/// Vendor codes for a stale access token; retried after forcing the token
/// manager to re-authenticate.
const STALE_TOKEN_CODES: [&str; 1] = ["602"];

/// What the retry loop should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Retry, but invalidate the cached access token first so the next
    /// attempt re-authenticates. This is what makes the request loop
    /// transparent to token expiry.
    RetryAfterReauth,
    Fail,
}

/// Classifies a failed attempt. Rules, in order:
///
/// 1. HTTP 5xx is retryable; any other completed status is not.
/// 2. Connection-level failures (timeout, connect) are retryable.
/// 3. A vendor error list retries on the rate-limit/concurrency codes,
///    retries-after-reauth on the stale-token codes, and fails otherwise.
/// 4. Anything unclassified fails closed.
pub fn classify(error: &ClientError) -> RetryDecision {
    match error {
        ClientError::Transport {
            status: Some(status),
            ..
        } => {
            if *status >= 500 {
                RetryDecision::Retry
            } else {
                RetryDecision::Fail
            }
        }
        ClientError::Transport {
            status: None,
            retryable,
            ..
        } => {
            if *retryable {
                RetryDecision::Retry
            } else {
                RetryDecision::Fail
            }
        }
        ClientError::Api(errors) => classify_vendor_errors(errors),
        _ => RetryDecision::Fail,
    }
}

fn classify_vendor_errors(errors: &[MarketoError]) -> RetryDecision {
    if errors
        .iter()
        .any(|e| RATE_LIMIT_CODES.contains(&e.code.as_str()))
    {
        return RetryDecision::Retry;
    }
    if errors
        .iter()
        .any(|e| STALE_TOKEN_CODES.contains(&e.code.as_str()))
    {
        return RetryDecision::RetryAfterReauth;
    }
    RetryDecision::Fail
}

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// Delay grows as `base * factor^attempt`, capped at `max`, with
    /// optional +/- 50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    /// Delay before the given retry attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let mut delay = Duration::from_secs_f64(seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let offset = fastrand::u64(0..=(jitter_ms * 2)) as i64 - jitter_ms as i64;
                    let total_ms = delay.as_millis() as i64 + offset;
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}
