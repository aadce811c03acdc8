use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::HeaderMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::method::HttpMethod;
use crate::response::FetchResponse;

/// Reason given when a request was cancelled.
///
/// Written before `signal` is cancelled, so a transport that observes the
/// signal can read it.
#[derive(Debug, Clone, Default)]
pub struct AbortReason(Arc<Mutex<Option<String>>>);

impl AbortReason {
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }

    pub(crate) fn set(&self, reason: Option<&str>) {
        *self.0.lock() = reason.map(str::to_owned);
    }
}

/// Options passed to a [`Transport`] for a single call.
///
/// `signal` is cancelled when the caller aborts the request. Transports
/// should stop work as soon as they observe it; the executor does not rely
/// on that and stops waiting on its own.
#[derive(Debug, Clone)]
pub struct FetchInit {
    pub method: HttpMethod,
    pub body: Option<Bytes>,
    pub headers: HeaderMap,
    pub signal: CancellationToken,
    pub abort_reason: AbortReason,
}

/// Fetch-compatible HTTP transport.
///
/// Implementations resolve once response headers are available; the body is
/// read later through [`FetchResponse`]. Any status code is a successful
/// fetch, status classification happens in the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, init: FetchInit) -> Result<FetchResponse, ApiError>;
}

/// Default transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a freshly built `reqwest` client
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(Self { http_client })
    }

    /// Wrap a preconfigured `reqwest` client (timeouts, proxies, TLS roots)
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, url: &str, init: FetchInit) -> Result<FetchResponse, ApiError> {
        let FetchInit {
            method,
            body,
            headers,
            signal,
            abort_reason,
        } = init;

        let mut req_builder = self
            .http_client
            .request(method.into(), url)
            .headers(headers);
        if let Some(body) = body {
            req_builder = req_builder.body(body);
        }

        let resp = tokio::select! {
            biased;
            () = signal.cancelled() => return Err(ApiError::Aborted { reason: abort_reason.get() }),
            resp = req_builder.send() => resp?,
        };

        let status = resp.status();
        let headers = resp.headers().clone();
        tracing::trace!(%url, %status, "response headers received");

        // Stop pulling body chunks once the request is aborted; dropping the
        // stream closes the connection.
        let stream = resp
            .bytes_stream()
            .map_err(|e| ApiError::Body(e.to_string()))
            .take_until(signal.cancelled_owned());

        Ok(FetchResponse::new(status, headers, Box::pin(stream)))
    }
}

/// Transport built from a closure, see [`transport_fn`]
pub struct FnTransport<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(String, FetchInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FetchResponse, ApiError>> + Send + 'static,
{
    async fn fetch(&self, url: &str, init: FetchInit) -> Result<FetchResponse, ApiError> {
        (self.f)(url.to_owned(), init).await
    }
}

/// Turn an async function with the fetch signature into a [`Transport`]
pub fn transport_fn<F, Fut>(f: F) -> Arc<dyn Transport>
where
    F: Fn(String, FetchInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<FetchResponse, ApiError>> + Send + 'static,
{
    Arc::new(FnTransport { f })
}
