//! HTTP transport capability consumed by the download engine.
//!
//! The engine never talks to `reqwest` directly: every request goes through a
//! [`Transport`], so tests can substitute scripted responses and callers can
//! plug in their own HTTP stack.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::BoxError;

/// Readable body stream of an [`IncomingResponse`].
pub type Body = Box<dyn AsyncRead + Send + Unpin>;

/// A request handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    /// HTTP method (`HEAD` for probes, `GET` for content).
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Headers, including `User-Agent` and `Range` when resuming.
    pub headers: HeaderMap,
}

/// A response returned by the transport.
pub struct IncomingResponse {
    /// Status code.
    pub status: StatusCode,
    /// Final URL after redirects.
    pub url: Url,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body stream; dropping it closes the underlying connection.
    pub body: Body,
}

impl fmt::Debug for IncomingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Failure reported by a [`Transport`].
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransportError {
    timeout: bool,
    #[source]
    source: BoxError,
}

impl TransportError {
    /// Wraps a non-timeout transport failure.
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            timeout: false,
            source: source.into(),
        }
    }

    /// Wraps a transport failure caused by a timeout.
    pub fn timeout(source: impl Into<BoxError>) -> Self {
        Self {
            timeout: true,
            source: source.into(),
        }
    }

    /// Returns true if the request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.timeout
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(error)
        } else {
            Self::new(error)
        }
    }
}

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `request` and returns the response head plus a streaming body.
    async fn execute(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transport with custom connect/read timeouts in seconds.
    ///
    /// Redirects are followed; bodies are never transparently decompressed, so
    /// byte offsets on disk always match offsets on the wire.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    /// Wraps an already configured `reqwest::Client`.
    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let body: Body = Box::new(StreamReader::new(Box::pin(stream)));

        Ok(IncomingResponse {
            status,
            url,
            headers,
            body,
        })
    }
}
