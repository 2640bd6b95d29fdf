/// Configures the pooled transport underneath the retry loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds, covering send and body read.
    pub timeout_ms: u64,
    /// TCP/TLS connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connections kept per host for reuse.
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept, in milliseconds.
    pub pool_idle_timeout_ms: u64,
    /// Upper bound on concurrent in-flight sends. `None` means unbounded.
    pub max_connections: Option<usize>,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            pool_max_idle_per_host: 16,
            pool_idle_timeout_ms: 90_000,
            max_connections: None,
            user_agent: concat!("resilient-http/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}
