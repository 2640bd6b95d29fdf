//! `resilient-http` is an async HTTP client that absorbs transient failures.
//!
//! Every request goes through [`ResilientClient::execute`], which:
//! - retries idempotent requests on retryable statuses (429, 5xx) and
//!   connection failures, with exponential backoff
//! - honors a delta-seconds `Retry-After` on 429 responses verbatim
//! - returns the final response as-is once the [`RetryConfig`] budget is spent
//!
//! The decision logic lives in [`policy`] and can be used on its own.

mod client;
mod config;
mod error;
mod options;
pub mod policy;
mod request;

pub use client::ResilientClient;
pub use config::RetryConfig;
pub use error::ResilientHttpError;
pub use options::ClientOptions;
pub use request::{Attempt, Request, Response};

pub use reqwest::{header, Method, StatusCode, Url};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ResilientHttpError>;
