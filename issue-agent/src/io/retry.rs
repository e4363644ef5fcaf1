//! Bounded retry with exponential backoff for external HTTP calls.
//!
//! Every tracker request and generative call is wrapped here so business
//! logic never loops on its own. A policy with `max_attempts = 1` behaves as
//! a single attempt.
//!
//! Non-idempotent writes go through [`RetryPolicy::execute_write`], which only
//! retries failures where the server provably did not act on the request.

use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

/// Failure of a single attempt, tagged with whether another try is worthwhile.
#[derive(Debug)]
pub struct AttemptError {
    pub error: anyhow::Error,
    pub retryable: bool,
    /// True when the server cannot have applied the request (connect
    /// failure, rate limit). Only these are retried for writes.
    pub unsent: bool,
    pub retry_after: Option<Duration>,
}

impl AttemptError {
    pub fn fatal(error: anyhow::Error) -> Self {
        Self {
            error,
            retryable: false,
            unsent: false,
            retry_after: None,
        }
    }

    /// Retryable, but the server may already have acted (5xx, read timeout).
    pub fn transient(error: anyhow::Error, retry_after: Option<Duration>) -> Self {
        Self {
            error,
            retryable: true,
            unsent: false,
            retry_after,
        }
    }

    /// Retryable and known not to have been applied.
    pub fn unsent(error: anyhow::Error, retry_after: Option<Duration>) -> Self {
        Self {
            error,
            retryable: true,
            unsent: true,
            retry_after,
        }
    }

    fn retryable_for(&self, write: bool) -> bool {
        self.retryable && (!write || self.unsent)
    }
}

/// Classified result of an external call after retries.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Success(T),
    /// The call succeeded but produced nothing usable.
    Empty,
    Failed(anyhow::Error),
}

impl<T> CallOutcome<T> {
    /// Collapse into an option, logging why nothing came back.
    pub fn into_option(self, operation: &str) -> Option<T> {
        match self {
            CallOutcome::Success(value) => Some(value),
            CallOutcome::Empty => {
                debug!(operation, "call returned no usable payload");
                None
            }
            CallOutcome::Failed(err) => {
                warn!(operation, err = %format!("{err:#}"), "call failed");
                None
            }
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, given the 1-based attempt that just failed.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = Duration::from_millis(self.base_delay_ms.saturating_mul(1 << exponent))
            .min(MAX_BACKOFF);
        match retry_after {
            Some(hint) if hint > backoff => hint,
            _ => backoff,
        }
    }

    /// Run an idempotent `call` until it succeeds, fails fatally, or attempts run out.
    pub fn execute<T>(
        &self,
        operation: &str,
        call: impl FnMut() -> Result<T, AttemptError>,
    ) -> Result<T> {
        self.run(operation, false, call)
    }

    /// Like [`RetryPolicy::execute`] for a non-idempotent write: a failure the
    /// server may have applied is returned instead of re-sent.
    pub fn execute_write<T>(
        &self,
        operation: &str,
        call: impl FnMut() -> Result<T, AttemptError>,
    ) -> Result<T> {
        self.run(operation, true, call)
    }

    fn run<T>(
        &self,
        operation: &str,
        write: bool,
        mut call: impl FnMut() -> Result<T, AttemptError>,
    ) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(failure) if failure.retryable_for(write) && attempt < max_attempts => {
                    let delay = self.delay_for(attempt, failure.retry_after);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        err = %format!("{:#}", failure.error),
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(failure) => {
                    return Err(failure
                        .error
                        .context(format!("{operation} failed after {attempt} attempt(s)")));
                }
            }
        }
    }
}

pub fn is_retryable_status(status: StatusCode, has_retry_after: bool) -> bool {
    is_rate_limited(status, has_retry_after) || matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

/// Rate-limit replies: the request was refused before it was processed.
fn is_rate_limited(status: StatusCode, has_retry_after: bool) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && has_retry_after)
}

/// Parse a `retry-after` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Classify a transport-level error. Connect failures and timeouts are
/// retryable; only connect failures are known to be unsent.
pub fn classify_send_error(err: reqwest::Error) -> AttemptError {
    let connect = err.is_connect();
    let timeout = err.is_timeout();
    let error = anyhow::Error::new(err).context("send request");
    if connect {
        AttemptError::unsent(error, None)
    } else if timeout {
        AttemptError::transient(error, None)
    } else {
        AttemptError::fatal(error)
    }
}

/// Pass successful responses through; turn error statuses into attempt errors.
pub fn check_status(response: Response) -> Result<Response, AttemptError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().unwrap_or_default();
    let error = anyhow!("HTTP {status}: {}", truncate_for_log(&body, 512));
    if is_rate_limited(status, retry_after.is_some()) {
        Err(AttemptError::unsent(error, retry_after))
    } else if is_retryable_status(status, retry_after.is_some()) {
        Err(AttemptError::transient(error, retry_after))
    } else {
        Err(AttemptError::fatal(error))
    }
}

fn truncate_for_log(text: &str, max: usize) -> &str {
    let text = text.trim();
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 500,
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(20, None), MAX_BACKOFF);
    }

    #[test]
    fn larger_retry_after_wins() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
        };
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_millis(10))),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let calls = Cell::new(0);
        let value = instant(3)
            .execute("op", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(AttemptError::transient(anyhow!("flaky"), None))
                } else {
                    Ok(7)
                }
            })
            .expect("succeeds");
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn fatal_failure_stops_immediately() {
        let calls = Cell::new(0);
        let err = instant(5)
            .execute::<()>("op", || {
                calls.set(calls.get() + 1);
                Err(AttemptError::fatal(anyhow!("bad request")))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(format!("{err:#}").contains("bad request"));
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let calls = Cell::new(0);
        let result = instant(1).execute::<()>("op", || {
            calls.set(calls.get() + 1);
            Err(AttemptError::transient(anyhow!("down"), None))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn write_is_not_resent_after_possibly_applied_failure() {
        let calls = Cell::new(0);
        let result = instant(3).execute_write::<()>("create comment", || {
            calls.set(calls.get() + 1);
            Err(AttemptError::transient(anyhow!("HTTP 502"), None))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn write_is_retried_when_never_applied() {
        let calls = Cell::new(0);
        let value = instant(3)
            .execute_write("create comment", || {
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    Err(AttemptError::unsent(anyhow!("HTTP 429"), None))
                } else {
                    Ok("posted")
                }
            })
            .expect("succeeds");
        assert_eq!(value, "posted");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retryable_statuses() {
        for code in [429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).expect("status");
            assert!(is_retryable_status(status, false), "{code}");
        }
        assert!(!is_retryable_status(StatusCode::NOT_FOUND, false));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN, false));
        assert!(is_retryable_status(StatusCode::FORBIDDEN, true));
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn outcome_collapses_to_option() {
        assert_eq!(CallOutcome::Success(1).into_option("op"), Some(1));
        assert_eq!(CallOutcome::<i32>::Empty.into_option("op"), None);
        assert_eq!(
            CallOutcome::<i32>::Failed(anyhow!("x")).into_option("op"),
            None
        );
    }
}
