use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Method, StatusCode};

use crate::{ResilientHttpError, Result};

const ENV_MAX_ATTEMPTS: &str = "RESILIENT_HTTP_MAX_ATTEMPTS";
const ENV_BACKOFF_FACTOR: &str = "RESILIENT_HTTP_BACKOFF_FACTOR";
const ENV_RETRY_STATUSES: &str = "RESILIENT_HTTP_RETRY_STATUSES";
const ENV_RETRY_METHODS: &str = "RESILIENT_HTTP_RETRY_METHODS";
const ENV_MAX_BACKOFF_SECS: &str = "RESILIENT_HTTP_MAX_BACKOFF_SECS";

/// Retry budget and classification rules.
///
/// A client takes its own copy at construction and never changes it.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per logical request, including the first one.
    pub max_attempts: usize,
    /// Seconds multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Statuses that trigger a retry.
    pub retryable_status_codes: HashSet<StatusCode>,
    /// Methods that may be retried. Keep this to idempotent verbs.
    pub retryable_methods: HashSet<Method>,
    /// Optional ceiling for exponential backoff. `Retry-After` is never capped.
    pub max_backoff: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_factor: 1.0,
            retryable_status_codes: [
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ]
            .into_iter()
            .collect(),
            retryable_methods: [Method::HEAD, Method::GET, Method::OPTIONS]
                .into_iter()
                .collect(),
            max_backoff: None,
        }
    }
}

impl RetryConfig {
    /// Sets the total attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff multiplier in seconds.
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Replaces the set of retryable statuses.
    pub fn with_status_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Replaces the set of retryable methods.
    pub fn with_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.retryable_methods = methods.into_iter().collect();
        self
    }

    /// Caps the exponential backoff delay.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    /// Checks the invariants a client relies on.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(ResilientHttpError::Configuration(
                "max_attempts must be at least 1".to_owned(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ResilientHttpError::Configuration(format!(
                "backoff_factor must be a finite non-negative number, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Builds a config from environment variables on top of the defaults.
    ///
    /// Reads:
    /// - `RESILIENT_HTTP_MAX_ATTEMPTS`: total attempts
    /// - `RESILIENT_HTTP_BACKOFF_FACTOR`: seconds multiplier
    /// - `RESILIENT_HTTP_RETRY_STATUSES`: comma-separated codes, e.g. `429,503`
    /// - `RESILIENT_HTTP_RETRY_METHODS`: comma-separated verbs, e.g. `GET,HEAD`
    /// - `RESILIENT_HTTP_MAX_BACKOFF_SECS`: backoff ceiling in seconds
    ///
    /// Unset or empty variables keep their default.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use resilient_http::RetryConfig;
    ///
    /// let config = RetryConfig::from_env().expect("invalid RESILIENT_HTTP_* env vars");
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = read(ENV_MAX_ATTEMPTS) {
            config.max_attempts = raw
                .trim()
                .parse()
                .map_err(|_| invalid_var(ENV_MAX_ATTEMPTS, &raw))?;
        }
        if let Some(raw) = read(ENV_BACKOFF_FACTOR) {
            config.backoff_factor = raw
                .trim()
                .parse()
                .map_err(|_| invalid_var(ENV_BACKOFF_FACTOR, &raw))?;
        }
        if let Some(raw) = read(ENV_RETRY_STATUSES) {
            config.retryable_status_codes = split_list(&raw)
                .map(|item| {
                    item.parse::<u16>()
                        .ok()
                        .and_then(|code| StatusCode::from_u16(code).ok())
                        .ok_or_else(|| invalid_var(ENV_RETRY_STATUSES, &raw))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = read(ENV_RETRY_METHODS) {
            config.retryable_methods = split_list(&raw)
                .map(|item| {
                    Method::from_bytes(item.to_ascii_uppercase().as_bytes())
                        .map_err(|_| invalid_var(ENV_RETRY_METHODS, &raw))
                })
                .collect::<Result<_>>()?;
        }
        if let Some(raw) = read(ENV_MAX_BACKOFF_SECS) {
            let secs: f64 = raw
                .trim()
                .parse()
                .map_err(|_| invalid_var(ENV_MAX_BACKOFF_SECS, &raw))?;
            let cap = Duration::try_from_secs_f64(secs)
                .map_err(|_| invalid_var(ENV_MAX_BACKOFF_SECS, &raw))?;
            config.max_backoff = Some(cap);
        }

        config.validate()?;
        Ok(config)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn invalid_var(key: &str, raw: &str) -> ResilientHttpError {
    ResilientHttpError::Configuration(format!("{key} has an invalid value: '{raw}'"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_factor, 1.0);
        assert_eq!(config.retryable_status_codes.len(), 5);
        assert!(config
            .retryable_status_codes
            .contains(&StatusCode::TOO_MANY_REQUESTS));
        assert!(config.retryable_methods.contains(&Method::GET));
        assert!(!config.retryable_methods.contains(&Method::POST));
        assert_eq!(config.max_backoff, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let err = RetryConfig::default()
            .with_max_attempts(0)
            .validate()
            .expect_err("zero attempts must be rejected");
        assert!(matches!(err, ResilientHttpError::Configuration(_)));
    }

    #[test]
    fn validate_rejects_negative_and_nan_backoff() {
        for factor in [-0.5, f64::NAN, f64::INFINITY] {
            let result = RetryConfig::default()
                .with_backoff_factor(factor)
                .validate();
            assert!(
                matches!(result, Err(ResilientHttpError::Configuration(_))),
                "factor {factor} must be rejected"
            );
        }
    }

    #[test]
    fn validate_accepts_zero_backoff() {
        assert!(RetryConfig::default()
            .with_backoff_factor(0.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn from_lookup_without_vars_is_default() {
        let config = RetryConfig::from_lookup(lookup(&[])).expect("defaults must load");
        assert_eq!(config, RetryConfig::default());
    }

    #[test]
    fn from_lookup_reads_every_variable() {
        let config = RetryConfig::from_lookup(lookup(&[
            (ENV_MAX_ATTEMPTS, "3"),
            (ENV_BACKOFF_FACTOR, "0.5"),
            (ENV_RETRY_STATUSES, "429, 503"),
            (ENV_RETRY_METHODS, "get,put"),
            (ENV_MAX_BACKOFF_SECS, "30"),
        ]))
        .expect("config must load");

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_factor, 0.5);
        assert_eq!(
            config.retryable_status_codes,
            [StatusCode::TOO_MANY_REQUESTS, StatusCode::SERVICE_UNAVAILABLE]
                .into_iter()
                .collect()
        );
        assert_eq!(
            config.retryable_methods,
            [Method::GET, Method::PUT].into_iter().collect()
        );
        assert_eq!(config.max_backoff, Some(Duration::from_secs(30)));
    }

    #[test]
    fn from_lookup_ignores_empty_values() {
        let config = RetryConfig::from_lookup(lookup(&[(ENV_MAX_ATTEMPTS, "  ")]))
            .expect("empty value keeps default");
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn from_lookup_names_the_bad_variable() {
        let err = RetryConfig::from_lookup(lookup(&[(ENV_RETRY_STATUSES, "429,abc")]))
            .expect_err("bad status must fail");
        assert!(err.to_string().contains(ENV_RETRY_STATUSES));
    }

    #[test]
    fn from_lookup_validates_result() {
        let err = RetryConfig::from_lookup(lookup(&[(ENV_MAX_ATTEMPTS, "0")]))
            .expect_err("zero attempts must fail");
        assert!(matches!(err, ResilientHttpError::Configuration(_)));
    }
}
