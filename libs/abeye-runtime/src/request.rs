use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderValue;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{ApiContext, ApiOptions};
use crate::error::ApiError;
use crate::method::HttpMethod;
use crate::transport::{AbortReason, FetchInit, Transport};

/// Body argument for operations that send no payload
pub const NO_BODY: Option<&()> = None;

const IN_FLIGHT: u8 = 0;
const CANCELLED: u8 = 1;
const SETTLED: u8 = 2;

#[derive(Debug)]
struct CancelState {
    phase: AtomicU8,
    reason: AbortReason,
    signal: CancellationToken,
}

impl CancelState {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(IN_FLIGHT),
            reason: AbortReason::default(),
            signal: CancellationToken::new(),
        }
    }

    fn settle(&self) {
        self.phase.store(SETTLED, Ordering::Release);
    }

    fn reason(&self) -> Option<String> {
        self.reason.get()
    }
}

/// Cancellation control for a [`PendingRequest`]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Abort the request if it is still in flight.
    ///
    /// Returns `true` only for the call that actually signalled the
    /// transport. Calls after the request settled, and repeated calls, do
    /// nothing and return `false`.
    pub fn cancel(&self, reason: Option<&str>) -> bool {
        if self
            .state
            .phase
            .compare_exchange(IN_FLIGHT, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.state.reason.set(reason);
        self.state.signal.cancel();
        tracing::debug!(reason, "request cancelled");
        true
    }

    /// `true` until the transport has settled
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.state.phase.load(Ordering::Acquire) != SETTLED
    }
}

/// One in-flight HTTP call.
///
/// Awaiting it yields the call's result. The request is sent when the future
/// is first polled; cancelling before that makes the transport see an
/// already-aborted signal.
pub struct PendingRequest<T> {
    future: BoxFuture<'static, Result<T, ApiError>>,
    handle: CancelHandle,
}

impl<T> std::fmt::Debug for PendingRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("in_flight", &self.handle.is_in_flight())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> PendingRequest<T> {
    /// Clone of the cancellation control, usable after the request is moved
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Shorthand for [`CancelHandle::cancel`]
    pub fn cancel(&self, reason: Option<&str>) -> bool {
        self.handle.cancel(reason)
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.handle.is_in_flight()
    }

    /// Split into the result future and its cancellation control
    #[must_use]
    pub fn into_parts(self) -> (BoxFuture<'static, Result<T, ApiError>>, CancelHandle) {
        (self.future, self.handle)
    }

    /// Post-process a successful result, keeping the same cancel control
    #[must_use]
    pub fn and_then<U, F>(self, f: F) -> PendingRequest<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, ApiError> + Send + 'static,
    {
        let future = self.future;
        PendingRequest {
            future: Box::pin(async move { future.await.and_then(f) }),
            handle: self.handle,
        }
    }
}

impl<T> Future for PendingRequest<T> {
    type Output = Result<T, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl ApiContext {
    /// Issue one HTTP request and resolve with the raw response body text.
    ///
    /// `path` is appended verbatim to the resolved base URL. A `body`, when
    /// given, is sent as JSON with `Content-Type: application/json`; that
    /// header is applied after the caller's headers and cannot be overridden
    /// by them.
    ///
    /// Non-success responses reject with [`ApiError::Status`] carrying the
    /// status and the error body text.
    pub fn execute<B>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        options: Option<&ApiOptions>,
    ) -> PendingRequest<String>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.resolve_api_base(options), path);
        let transport = self.resolve_transport(options);
        let mut headers = options.map(|o| o.headers.clone()).unwrap_or_default();
        let payload = body
            .map(|b| serde_json::to_vec(b).map(Bytes::from))
            .transpose();
        if body.is_some() {
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        let state = Arc::new(CancelState::new());
        let handle = CancelHandle {
            state: Arc::clone(&state),
        };

        let future = async move {
            let result = match payload {
                Ok(body) => {
                    let init = FetchInit {
                        method,
                        body,
                        headers,
                        signal: state.signal.clone(),
                        abort_reason: state.reason.clone(),
                    };
                    tracing::debug!(%method, %url, "sending request");
                    tokio::select! {
                        biased;
                        () = state.signal.cancelled() => Err(ApiError::Aborted { reason: state.reason() }),
                        result = send(transport.as_ref(), &url, init) => result,
                    }
                }
                Err(err) => Err(ApiError::Serialize(err)),
            };
            state.settle();
            if let Err(err) = &result {
                tracing::debug!(%method, %url, error = %err, "request failed");
            }
            result
        };

        PendingRequest {
            future: Box::pin(future),
            handle,
        }
    }
}

async fn send(transport: &dyn Transport, url: &str, init: FetchInit) -> Result<String, ApiError> {
    let response = transport.fetch(url, init).await?;
    if response.ok() {
        return response.text().await;
    }
    let status = response.status();
    let body = response.text().await?;
    Err(ApiError::Status { status, body })
}
