/// Error type returned by this crate.
///
/// HTTP error statuses are not errors here: once the retry budget is spent the
/// last response is returned as a normal [`Response`](crate::Response).
#[derive(Debug, thiserror::Error)]
pub enum ResilientHttpError {
    /// Invalid retry configuration or client options.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A request descriptor could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Network failure from `reqwest` after the last permitted attempt.
    #[error("transport error after {attempts} attempt(s): {source}")]
    Transport {
        /// Number of sends performed, including the failing one.
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    /// The caller cancelled the request or its deadline passed.
    #[error("request cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Number of sends started before cancellation.
        attempts: usize,
    },
    /// The client was closed before or during the request.
    #[error("client is closed")]
    Closed,
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ResilientHttpError {
    /// Returns `true` for [`ResilientHttpError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` for [`ResilientHttpError::Transport`].
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
