//! Retry decisions.
//!
//! Everything here is a pure function of its arguments: no I/O, no clocks, no
//! shared state. The client consults it after every response or transport
//! failure.

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    Method, StatusCode,
};

use crate::RetryConfig;

/// Outcome of consulting the policy after one attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Hand the response to the caller.
    Return,
    /// Wait for the given delay, then send again.
    RetryAfter(Duration),
}

/// Returns `true` when a response with `status` on attempt `attempt`
/// (1-based) should be retried.
pub fn should_retry(
    method: &Method,
    status: StatusCode,
    attempt: usize,
    config: &RetryConfig,
) -> bool {
    has_budget(attempt, config)
        && config.retryable_methods.contains(method)
        && config.retryable_status_codes.contains(&status)
}

/// Returns `true` when a transport failure on attempt `attempt` should be
/// retried. Only retryable (idempotent) methods qualify.
pub fn should_retry_transport(method: &Method, attempt: usize, config: &RetryConfig) -> bool {
    has_budget(attempt, config) && config.retryable_methods.contains(method)
}

/// Classifies a `reqwest` failure as a transient, connection-level one.
///
/// Builder, redirect and decode errors are permanent.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}

/// Delay before the attempt following `attempt`.
///
/// A 429 with a delta-seconds `Retry-After` is honored verbatim. Anything
/// else uses [`backoff_delay`].
pub fn compute_delay(
    status: StatusCode,
    headers: &HeaderMap,
    attempt: usize,
    config: &RetryConfig,
) -> Duration {
    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(delay) = retry_after(headers) {
            return delay;
        }
    }
    backoff_delay(attempt, config)
}

/// `backoff_factor * 2^(attempt - 1)` seconds, clamped to `max_backoff`.
pub fn backoff_delay(attempt: usize, config: &RetryConfig) -> Duration {
    if config.backoff_factor == 0.0 {
        return Duration::ZERO;
    }
    let exp = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
    let secs = config.backoff_factor * 2f64.powi(exp);
    let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
    match config.max_backoff {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

/// Parses `Retry-After` as delta-seconds.
///
/// The HTTP-date form is not supported and yields `None`, as do negative,
/// fractional and empty values. Values beyond `u64` seconds saturate.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Duration::from_secs(value.parse::<u64>().unwrap_or(u64::MAX)))
}

/// Combines [`should_retry`] and [`compute_delay`].
pub fn decide(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
    attempt: usize,
    config: &RetryConfig,
) -> RetryDecision {
    if should_retry(method, status, attempt, config) {
        RetryDecision::RetryAfter(compute_delay(status, headers, attempt, config))
    } else {
        RetryDecision::Return
    }
}

fn has_budget(attempt: usize, config: &RetryConfig) -> bool {
    attempt < config.max_attempts
}
