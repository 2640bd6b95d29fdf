use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::{header::HeaderMap, StatusCode, Url};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    policy::{self, RetryDecision},
    Attempt, ClientOptions, Request, ResilientHttpError, Response, Result, RetryConfig,
};

/// HTTP client that retries transient failures over one shared connection pool.
///
/// Clones share the pool, the in-flight bound and the closed flag.
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Mutex<Option<reqwest::Client>>,
    permits: Option<Semaphore>,
    config: RetryConfig,
    options: ClientOptions,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.inner.config)
            .field("options", &self.inner.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Vec<u8>,
}

/// Ways a caller can abandon a request early.
#[derive(Clone, Copy, Default)]
struct Interrupt<'a> {
    cancel: Option<&'a CancellationToken>,
    deadline: Option<Instant>,
}

impl Interrupt<'_> {
    /// Runs `fut` unless cancellation or the deadline fires first.
    async fn guard<F: Future>(&self, fut: F, attempts: usize) -> Result<F::Output> {
        let cancelled = async {
            match self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(ResilientHttpError::Cancelled { attempts }),
            _ = expired => Err(ResilientHttpError::Cancelled { attempts }),
            output = fut => Ok(output),
        }
    }
}

impl ResilientClient {
    /// Creates a client with default transport options.
    pub fn new(config: RetryConfig) -> Result<Self> {
        Self::with_options(config, ClientOptions::default())
    }

    /// Creates a client with explicit transport options.
    ///
    /// The transport is built eagerly; connections are opened on first use.
    pub fn with_options(config: RetryConfig, options: ClientOptions) -> Result<Self> {
        config.validate()?;
        validate_options(&options)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(options.timeout_ms))
            .connect_timeout(Duration::from_millis(options.connect_timeout_ms))
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_millis(options.pool_idle_timeout_ms))
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|err| {
                ResilientHttpError::Configuration(format!("cannot build http transport: {err}"))
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(Some(http)),
                permits: options.max_connections.map(Semaphore::new),
                config,
                options,
            }),
        })
    }

    /// Creates a client from `RESILIENT_HTTP_*` environment variables.
    ///
    /// See [`RetryConfig::from_env`] for the variables read.
    pub fn from_env() -> Result<Self> {
        Self::new(RetryConfig::from_env()?)
    }

    /// Retry configuration fixed at construction.
    pub fn config(&self) -> &RetryConfig {
        &self.inner.config
    }

    /// Transport options fixed at construction.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Sends `request`, retrying per the client's [`RetryConfig`].
    ///
    /// Returns the first non-retryable response, or the last one once the
    /// budget is spent, whatever its status.
    ///
    /// # Errors
    ///
    /// [`ResilientHttpError::Transport`] when the final permitted attempt fails
    /// at the connection level, [`ResilientHttpError::Closed`] after
    /// [`close`](Self::close).
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.run(&request, Interrupt::default()).await
    }

    /// Like [`execute`](Self::execute), returning
    /// [`ResilientHttpError::Cancelled`] as soon as `token` fires.
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        token: &CancellationToken,
    ) -> Result<Response> {
        let interrupt = Interrupt {
            cancel: Some(token),
            deadline: None,
        };
        self.run(&request, interrupt).await
    }

    /// Like [`execute`](Self::execute), returning
    /// [`ResilientHttpError::Cancelled`] once `deadline` passes.
    pub async fn execute_with_deadline(
        &self,
        request: Request,
        deadline: Instant,
    ) -> Result<Response> {
        let interrupt = Interrupt {
            cancel: None,
            deadline: Some(deadline),
        };
        self.run(&request, interrupt).await
    }

    /// Releases the pool. Every later `execute` fails with
    /// [`ResilientHttpError::Closed`].
    ///
    /// Requests already on the wire finish their current attempt but do not
    /// start another one.
    pub fn close(&self) {
        let released = self
            .inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(permits) = &self.inner.permits {
            permits.close();
        }

        if let Some(transport) = released {
            #[cfg(feature = "tracing")]
            tracing::debug!("resilient client closed, connection pool released");
            drop(transport);
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called on any clone.
    pub fn is_closed(&self) -> bool {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    async fn run(&self, request: &Request, interrupt: Interrupt<'_>) -> Result<Response> {
        let config = &self.inner.config;
        let mut attempts = Vec::with_capacity(1);
        let mut waited = Duration::ZERO;
        let mut attempt = 1usize;

        loop {
            let http = self.transport()?;
            let sent = {
                let _permit = interrupt.guard(self.acquire_permit(), attempt - 1).await??;
                interrupt.guard(send_once(&http, request), attempt).await?
            };

            let delay = match sent {
                Ok(reply) => {
                    attempts.push(Attempt {
                        number: attempt,
                        status: Some(reply.status),
                        waited,
                    });
                    match policy::decide(
                        request.method(),
                        reply.status,
                        &reply.headers,
                        attempt,
                        config,
                    ) {
                        RetryDecision::Return => {
                            return Ok(Response::new(
                                reply.status,
                                reply.headers,
                                reply.url,
                                reply.body,
                                attempts,
                            ));
                        }
                        RetryDecision::RetryAfter(delay) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(
                                method = %request.method(),
                                url = %request.url(),
                                attempt,
                                status = reply.status.as_u16(),
                                delay_ms = delay.as_millis() as u64,
                                "retrying request after retryable status"
                            );
                            delay
                        }
                    }
                }
                Err(err) => {
                    attempts.push(Attempt {
                        number: attempt,
                        status: None,
                        waited,
                    });
                    if !(policy::is_transient(&err)
                        && policy::should_retry_transport(request.method(), attempt, config))
                    {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            method = %request.method(),
                            url = %request.url(),
                            attempt,
                            error = %err,
                            "request failed at transport level"
                        );
                        return Err(ResilientHttpError::Transport {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = policy::backoff_delay(attempt, config);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        method = %request.method(),
                        url = %request.url(),
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request after transport failure"
                    );
                    delay
                }
            };

            interrupt.guard(sleep(delay), attempt).await?;
            waited = delay;
            attempt += 1;
        }
    }

    fn transport(&self) -> Result<reqwest::Client> {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ResilientHttpError::Closed)
    }

    async fn acquire_permit(&self) -> Result<Option<SemaphorePermit<'_>>> {
        match &self.inner.permits {
            Some(permits) => permits
                .acquire()
                .await
                .map(Some)
                .map_err(|_| ResilientHttpError::Closed),
            None => Ok(None),
        }
    }
}

async fn send_once(
    http: &reqwest::Client,
    request: &Request,
) -> std::result::Result<Reply, reqwest::Error> {
    let mut builder = http
        .request(request.method().clone(), request.url().clone())
        .headers(request.headers().clone());
    if let Some(body) = request.body_bytes() {
        builder = builder.body(body.to_vec());
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let url = response.url().clone();
    let body = response.bytes().await?.to_vec();

    Ok(Reply {
        status,
        headers,
        url,
        body,
    })
}

fn validate_options(options: &ClientOptions) -> Result<()> {
    if options.timeout_ms == 0 || options.connect_timeout_ms == 0 {
        return Err(ResilientHttpError::Configuration(
            "timeouts must be greater than zero".to_owned(),
        ));
    }
    match options.max_connections {
        Some(0) => Err(ResilientHttpError::Configuration(
            "max_connections must be at least 1".to_owned(),
        )),
        Some(limit) if limit > Semaphore::MAX_PERMITS => Err(ResilientHttpError::Configuration(
            format!("max_connections must not exceed {}", Semaphore::MAX_PERMITS),
        )),
        _ => Ok(()),
    }
}
