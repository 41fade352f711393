//! HTTP Client Abstraction
//!
//! Streaming HTTP for the TTS endpoint: the response body is handed over as
//! an incremental byte stream so audio can start before the server finishes.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Incremental response body. Each item is one network read.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON serialization failed: {}", e))
        })?;
        self.body = Some(Bytes::from(json));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Overall request timeout. Streaming requests normally leave this unset:
    /// narration can legitimately run for minutes and is cancelled explicitly.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Fully buffered HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Response whose headers have arrived but whose body is still streaming.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ByteStream,
}

impl fmt::Debug for HttpStreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpStreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Buffer the remaining body, keeping at most `limit` bytes.
    ///
    /// Used for error responses, where only a small JSON document is expected.
    /// Reading stops once the limit is reached.
    pub async fn into_buffered(mut self, limit: usize) -> Result<HttpResponse> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            let remaining = limit.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            if body.len() >= limit {
                break;
            }
        }

        Ok(HttpResponse {
            status: self.status,
            headers: self.headers,
            body: body.freeze(),
        })
    }
}

/// Async HTTP client trait
///
/// Implementations should handle TLS and connection pooling. Retries are not
/// expected: a narration request that fails is reported, not replayed.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest, HttpMethod};
/// use futures::StreamExt;
///
/// async fn read_all(client: &dyn HttpClient) -> Result<usize> {
///     let request = HttpRequest::new(HttpMethod::Post, "https://tts.example.com/stream");
///     let mut response = client.execute_stream(request).await?;
///     let mut total = 0;
///     while let Some(chunk) = response.body.next().await {
///         total += chunk?.len();
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return as soon as the response headers arrive.
    ///
    /// Dropping the returned body aborts the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Network`] if the connection cannot be
    /// established or the request cannot be sent. Non-2xx statuses are *not*
    /// errors at this layer.
    async fn execute_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse>;
}
