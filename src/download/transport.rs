//! HTTP transport boundary used by download sessions.
//!
//! Sessions talk to the network only through [`HttpTransport`], which keeps
//! the state machine testable with scripted responses. [`ReqwestTransport`]
//! is the production adapter.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RANGE};
use reqwest::{Client, Method};
use tracing::{debug, instrument};
use url::Url;

use super::error::TransportError;
use crate::user_agent;

/// Inclusive byte range sent as `Range: bytes=start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// Last byte (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    /// Always false; a range covers at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of the `Range` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One HEAD or GET request issued by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Target URL.
    pub url: String,
    /// Optional `Content-Type` header value.
    pub content_type: Option<String>,
    /// Byte range, when range requests are in use.
    pub range: Option<ByteRange>,
}

impl TransportRequest {
    /// Creates a request without a range.
    pub fn new(url: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            url: url.into(),
            content_type,
            range: None,
        }
    }

    /// Returns a copy restricted to `range`.
    #[must_use]
    pub fn with_range(&self, range: Option<ByteRange>) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }
}

/// Result of a size-discovery request.
#[derive(Debug, Clone)]
pub struct HeadResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Body deliveries of a GET response.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Result of a chunk request: status, headers and the streaming body.
pub struct GetResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Incremental body deliveries.
    pub body: BodyStream,
}

impl fmt::Debug for GetResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// HTTP client adapter consumed by [`DownloadSession`](super::DownloadSession).
///
/// Cancelling a request means dropping the future or stream that polls it.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a HEAD request.
    async fn head(&self, request: &TransportRequest) -> Result<HeadResponse, TransportError>;

    /// Issues a GET request and returns once the response head arrives.
    async fn get(&self, request: &TransportRequest) -> Result<GetResponse, TransportError>;
}

/// Production transport built on `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport with the given timeouts, gzip support and the tool User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the client cannot be constructed.
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(connect_timeout)
            .gzip(true)
            .user_agent(user_agent::default_user_agent());
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|source| TransportError::Build { source })?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        method: Method,
        request: &TransportRequest,
    ) -> Result<reqwest::Response, TransportError> {
        let url = Url::parse(&request.url)
            .map_err(|_| TransportError::invalid_url(request.url.clone()))?;

        let mut builder = self.client.request(method, url);
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(range) = request.range {
            builder = builder.header(RANGE, range.header_value());
        }

        builder
            .send()
            .await
            .map_err(|e| TransportError::network(request.url.clone(), e))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(level = "debug", skip(self), fields(url = %request.url))]
    async fn head(&self, request: &TransportRequest) -> Result<HeadResponse, TransportError> {
        let response = self.send(Method::HEAD, request).await?;
        debug!(status = response.status().as_u16(), "HEAD response");
        Ok(HeadResponse {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
        })
    }

    #[instrument(level = "debug", skip(self), fields(url = %request.url, range = ?request.range))]
    async fn get(&self, request: &TransportRequest) -> Result<GetResponse, TransportError> {
        let response = self.send(Method::GET, request).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        debug!(status, "GET response");

        let url = request.url.clone();
        let body = response
            .bytes_stream()
            .map(move |delivery| {
                delivery.map_err(|e| {
                    if e.is_timeout() {
                        TransportError::timeout(url.clone())
                    } else {
                        TransportError::interrupted(url.clone(), e.to_string())
                    }
                })
            })
            .boxed();

        Ok(GetResponse {
            status,
            headers,
            body,
        })
    }
}
