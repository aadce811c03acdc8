use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::Stream;
use http::{HeaderMap, StatusCode};

use crate::error::ApiError;
use crate::sse::SseEventStream;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Response handed back by a [`Transport`](crate::Transport).
///
/// Mirrors the subset of the fetch `Response` contract the runtime relies
/// on: a success flag derived from the status, and a body that can be read
/// to text or consumed incrementally.
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

enum ResponseBody {
    Buffered(Bytes),
    Streaming(BoxStream<Result<Bytes, ApiError>>),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => {
                f.debug_tuple("ResponseBody::Buffered").field(&bytes.len()).finish()
            }
            ResponseBody::Streaming(_) => write!(f, "ResponseBody::Streaming(..)"),
        }
    }
}

impl FetchResponse {
    /// Create a response whose body arrives as a byte stream
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        stream: BoxStream<Result<Bytes, ApiError>>,
    ) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Streaming(stream),
        }
    }

    /// Create a response from an already buffered body
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, bytes: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(bytes.into()),
        }
    }

    /// `true` for 2xx statuses
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Consume the response and return the entire body as bytes
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the body stream.
    pub async fn bytes(self) -> Result<Bytes, ApiError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streaming(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Consume the response and return the body as a string
    ///
    /// # Errors
    ///
    /// Fails when the body stream fails or the body is not valid UTF-8.
    pub async fn text(self) -> Result<String, ApiError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ApiError::Body(format!("invalid UTF-8: {e}")))
    }

    /// Convert the response into a byte stream for incremental consumption
    #[must_use]
    pub fn into_stream(self) -> BoxStream<Result<Bytes, ApiError>> {
        match self.body {
            ResponseBody::Buffered(bytes) => {
                Box::pin(futures::stream::once(async move { Ok(bytes) }))
            }
            ResponseBody::Streaming(stream) => stream,
        }
    }

    /// Convert the response into a stream of Server-Sent Event frames
    #[must_use]
    pub fn into_sse_stream(self) -> SseEventStream {
        SseEventStream::new(self.into_stream())
    }
}
