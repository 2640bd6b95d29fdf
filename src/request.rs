use std::fmt;
use std::time::Duration;

use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{ResilientHttpError, Result};

/// Outbound request descriptor.
///
/// The same method, URL, headers and body are sent on every attempt.
#[derive(Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut headers = self.headers.clone();
        if headers.contains_key(header::AUTHORIZATION) {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static("<redacted>"));
        }
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

impl Request {
    /// Creates a request, parsing `url`.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|err| {
            ResilientHttpError::InvalidRequest(format!("invalid url '{url}': {err}"))
        })?;
        Ok(Self::from_url(method, url))
    }

    /// Creates a request from an already parsed URL.
    pub fn from_url(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// `GET` request for `url`.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// `HEAD` request for `url`.
    pub fn head(url: &str) -> Result<Self> {
        Self::new(Method::HEAD, url)
    }

    /// `OPTIONS` request for `url`.
    pub fn options(url: &str) -> Result<Self> {
        Self::new(Method::OPTIONS, url)
    }

    /// `POST` request for `url`. Not retried under the default config.
    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// `PUT` request for `url`.
    pub fn put(url: &str) -> Result<Self> {
        Self::new(Method::PUT, url)
    }

    /// `DELETE` request for `url`.
    pub fn delete(url: &str) -> Result<Self> {
        Self::new(Method::DELETE, url)
    }

    /// Sets a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets `Authorization` from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Result<Self> {
        let authorization = normalize_bearer_authorization(token.as_ref());
        let mut value = HeaderValue::from_str(&authorization).map_err(|_| {
            ResilientHttpError::InvalidRequest("token is not a valid header value".to_owned())
        })?;
        value.set_sensitive(true);
        Ok(self.header(header::AUTHORIZATION, value))
    }

    /// Sets a raw body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `payload` as the JSON body and sets `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(self, payload: &T) -> Result<Self> {
        let body = serde_json::to_vec(payload).map_err(|err| {
            ResilientHttpError::InvalidRequest(format!("cannot serialize json body: {err}"))
        })?;
        Ok(self
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .body(body))
    }

    /// HTTP method sent on every attempt.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers sent on every attempt.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body, if one was set.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// One send of a logical request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: usize,
    /// Status of the response, or `None` if the transport failed first.
    pub status: Option<StatusCode>,
    /// Delay honored before this attempt; zero for the first.
    pub waited: Duration,
}

/// Response returned to the caller after retries are settled.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Vec<u8>,
    attempts: Vec<Attempt>,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        url: Url,
        body: Vec<u8>,
        attempts: Vec<Attempt>,
    ) -> Self {
        Self {
            status,
            headers,
            url,
            body,
            attempts,
        }
    }

    /// Status of the final attempt.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Headers of the final response.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Raw body of the final response.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the response, returning the raw body.
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            ResilientHttpError::Decode(format!(
                "invalid json response: {err}; body: {}",
                self.text()
            ))
        })
    }

    /// Every send made for this request, in order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
