//! Server-Sent Events support.
//!
//! [`ApiContext::open_stream`] returns an [`SseSession`], a stream of
//! [`StreamEvent`]s that ends when the session is cancelled or the server
//! closes the connection. There is no reconnection. For callback-style
//! consumption, [`SseSession::into_listener`] pumps the session into a single
//! replaceable listener.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::HeaderValue;
use parking_lot::{Mutex, ReentrantMutex};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::config::{ApiContext, ApiOptions};
use crate::error::ApiError;
use crate::json::decode_json;
use crate::method::HttpMethod;
use crate::response::BoxStream;
use crate::transport::{AbortReason, FetchInit};

/// A parsed Server-Sent Event frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Optional event ID
    pub id: Option<String>,
    /// Optional event type
    pub event: Option<String>,
    /// Event data
    pub data: String,
    /// Optional retry interval in milliseconds
    pub retry: Option<u64>,
}

/// Stream of Server-Sent Event frames parsed from a byte stream
pub struct SseEventStream {
    inner: BoxStream<Result<Bytes, ApiError>>,
    buffer: Vec<u8>,
}

impl SseEventStream {
    pub fn new(stream: BoxStream<Result<Bytes, ApiError>>) -> Self {
        Self {
            inner: stream,
            buffer: Vec::new(),
        }
    }

    /// Read the next event that carries data.
    ///
    /// Returns `Ok(None)` once the byte stream ends; a trailing event without
    /// its terminating blank line is discarded.
    ///
    /// # Errors
    ///
    /// Propagates byte stream errors. A frame that is not valid UTF-8 yields
    /// [`ApiError::InvalidEvent`]; the frame is consumed, so reading may
    /// continue afterwards.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, ApiError> {
        loop {
            while let Some(frame) = self.take_frame() {
                if let Some(event) = parse_frame(&frame)? {
                    return Ok(Some(event));
                }
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }

    /// Remove the first complete frame (up to its blank line) from the buffer
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let (frame_end, consumed) = find_blank_line(&self.buffer)?;
        let frame = self.buffer[..frame_end].to_vec();
        self.buffer.drain(..consumed);
        Some(frame)
    }
}

/// Locate the first empty line; returns where the frame before it ends and
/// how many bytes the frame plus the empty line occupy.
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, byte) in buf.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

/// Parse one frame.
///
/// Frames without a `data` line produce no event. An empty `data` line still
/// produces an event with empty data, matching browser `EventSource`.
fn parse_frame(frame: &[u8]) -> Result<Option<SseEvent>, ApiError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| ApiError::InvalidEvent(format!("invalid UTF-8 in SSE: {e}")))?;

    let mut id = None;
    let mut event = None;
    let mut data_lines = Vec::new();
    let mut retry = None;

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" => id = Some(value.to_owned()),
            "event" => event = Some(value.to_owned()),
            "data" => data_lines.push(value),
            "retry" => retry = value.parse::<u64>().ok(),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return Ok(None);
    }

    Ok(Some(SseEvent {
        id,
        event,
        data: data_lines.join("\n"),
        retry,
    }))
}

/// Message delivered by an SSE session.
///
/// `data` is the raw payload; `T` only records what the server is declared
/// to send. Use [`json`](Self::json) to decode it.
pub struct SseMessage<T> {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> SseMessage<T> {
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
            _payload: PhantomData,
        }
    }

    /// Decode the payload as JSON
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] when the payload does not match `T`.
    pub fn json(&self) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        decode_json(&self.data)
    }
}

impl<T> From<SseEvent> for SseMessage<T> {
    fn from(event: SseEvent) -> Self {
        Self {
            id: event.id,
            event: event.event,
            data: event.data,
            _payload: PhantomData,
        }
    }
}

impl<T> Clone for SseMessage<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            event: self.event.clone(),
            data: self.data.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> PartialEq for SseMessage<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.event == other.event && self.data == other.data
    }
}

impl<T> std::fmt::Debug for SseMessage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseMessage")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("data", &self.data)
            .finish()
    }
}

/// Item of an [`SseSession`]
#[derive(Debug)]
pub enum StreamEvent<T> {
    Message(SseMessage<T>),
    /// Transport-level failure. Connection, status and body errors end the
    /// session after being delivered; a malformed frame does not.
    Error(ApiError),
}

impl<T> StreamEvent<T> {
    #[must_use]
    pub fn as_message(&self) -> Option<&SseMessage<T>> {
        match self {
            Self::Message(message) => Some(message),
            Self::Error(_) => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&ApiError> {
        match self {
            Self::Error(err) => Some(err),
            Self::Message(_) => None,
        }
    }
}

type SharedStream<T> = Arc<Mutex<Option<BoxStream<StreamEvent<T>>>>>;

/// Closes an [`SseSession`] from anywhere
#[derive(Clone)]
pub struct SseCancelHandle {
    token: CancellationToken,
    close: Arc<dyn Fn() + Send + Sync>,
}

impl std::fmt::Debug for SseCancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseCancelHandle")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SseCancelHandle {
    fn new<T: 'static>(token: CancellationToken, stream: SharedStream<T>) -> Self {
        let close = move || {
            // Dropping the inner stream drops the response body, which
            // releases the connection.
            let closed = stream.lock().take();
            if closed.is_some() {
                tracing::trace!("SSE connection released");
            }
        };
        Self {
            token,
            close: Arc::new(close),
        }
    }

    /// Close the connection. No events are yielded afterwards.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("SSE session cancelled");
        }
        self.token.cancel();
        (self.close)();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One persistent SSE connection.
///
/// The connection is opened on first poll. The stream is not restartable;
/// open a new session to reconnect.
pub struct SseSession<T> {
    inner: SharedStream<T>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    cancel: SseCancelHandle,
}

impl<T> std::fmt::Debug for SseSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseSession")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> SseSession<T> {
    fn new(inner: BoxStream<StreamEvent<T>>, token: CancellationToken) -> Self {
        let inner: SharedStream<T> = Arc::new(Mutex::new(Some(inner)));
        Self {
            cancelled: Box::pin(token.clone().cancelled_owned()),
            cancel: SseCancelHandle::new(token, Arc::clone(&inner)),
            inner,
        }
    }

    /// Close the connection immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_handle(&self) -> SseCancelHandle {
        self.cancel.clone()
    }

    /// Move the session onto a background task that feeds a single listener.
    ///
    /// The listener slot starts empty: events that arrive before
    /// [`SseListener::listen`] is called are dropped. Must be called within a
    /// tokio runtime.
    #[must_use]
    pub fn into_listener(self) -> SseListener<T> {
        let slot: Arc<Mutex<Option<Listener<T>>>> = Arc::new(Mutex::new(None));
        let gate = Arc::new(ReentrantMutex::new(()));
        let cancel = self.cancel.clone();
        let task = tokio::spawn(pump(self, Arc::clone(&slot), Arc::clone(&gate)));
        SseListener {
            slot,
            gate,
            cancel,
            task: Some(task),
        }
    }
}

impl<T> Stream for SseSession<T> {
    type Item = StreamEvent<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Polling the cancellation future keeps this task registered for
        // wakeup even while the inner stream waits on something else.
        if self.cancel.is_cancelled() || self.cancelled.as_mut().poll(cx).is_ready() {
            (self.cancel.close)();
            return Poll::Ready(None);
        }

        let mut inner = self.inner.lock();
        let Some(stream) = inner.as_mut() else {
            return Poll::Ready(None);
        };
        let next = stream.as_mut().poll_next(cx);
        if matches!(next, Poll::Ready(None)) {
            *inner = None;
        }
        next
    }
}

type Listener<T> = Box<dyn FnMut(StreamEvent<T>) + Send>;

/// Callback-style view of an [`SseSession`] with one listener at a time
pub struct SseListener<T> {
    slot: Arc<Mutex<Option<Listener<T>>>>,
    // Held by the pump for each callback invocation
    gate: Arc<ReentrantMutex<()>>,
    cancel: SseCancelHandle,
    task: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for SseListener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseListener")
            .field("has_listener", &self.slot.lock().is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T> SseListener<T> {
    /// Register the listener, replacing the previous one
    pub fn listen<F>(&self, callback: F)
    where
        F: FnMut(StreamEvent<T>) + Send + 'static,
    {
        *self.slot.lock() = Some(Box::new(callback));
    }

    /// Close the connection; the listener is not invoked again.
    ///
    /// If a callback is running on another thread, this waits for it to
    /// return. Calling it from inside the callback is allowed.
    pub fn cancel(&self) {
        self.cancel.cancel();
        drop(self.gate.lock());
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the pump task has stopped (after cancel or server close)
    pub async fn closed(mut self) {
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(error = %err, "SSE listener task failed");
        }
    }
}

impl<T> Drop for SseListener<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump<T: 'static>(
    mut session: SseSession<T>,
    slot: Arc<Mutex<Option<Listener<T>>>>,
    gate: Arc<ReentrantMutex<()>>,
) {
    while let Some(event) = session.next().await {
        // Take the callback out so it may call `listen` without deadlocking.
        let taken = slot.lock().take();
        let Some(mut callback) = taken else {
            tracing::trace!("dropping SSE event, no listener registered");
            continue;
        };
        {
            let _delivering = gate.lock();
            if session.cancel.is_cancelled() {
                break;
            }
            callback(event);
        }
        let mut guard = slot.lock();
        if guard.is_none() {
            *guard = Some(callback);
        }
    }
    tracing::debug!("SSE listener pump finished");
}

impl ApiContext {
    /// Open a Server-Sent Events stream at the resolved base URL plus `path`.
    ///
    /// `method` is accepted for symmetry with the other operations; the
    /// subscription is always a `GET`. Caller headers are sent, and
    /// `Accept: text/event-stream` is added unless the caller set one.
    pub fn open_stream<T: 'static>(
        &self,
        method: HttpMethod,
        path: &str,
        options: Option<&ApiOptions>,
    ) -> SseSession<T> {
        let url = format!("{}{}", self.resolve_api_base(options), path);
        let transport = self.resolve_transport(options);
        let mut headers = options.map(|o| o.headers.clone()).unwrap_or_default();
        headers
            .entry(http::header::ACCEPT)
            .or_insert(HeaderValue::from_static("text/event-stream"));

        let token = CancellationToken::new();
        let signal = token.clone();
        tracing::debug!(%method, %url, "opening SSE stream");

        let inner = async_stream::stream! {
            let init = FetchInit {
                method: HttpMethod::Get,
                body: None,
                headers,
                signal: signal.clone(),
                abort_reason: AbortReason::default(),
            };
            let fetched = tokio::select! {
                biased;
                () = signal.cancelled() => return,
                fetched = transport.fetch(&url, init) => fetched,
            };
            let response = match fetched {
                Ok(response) => response,
                Err(err) => {
                    yield StreamEvent::Error(err);
                    return;
                }
            };
            if !response.ok() {
                let status = response.status();
                // An unreadable error body is delivered in place of the status.
                match response.text().await {
                    Ok(body) => {
                        yield StreamEvent::Error(ApiError::Status { status, body });
                    }
                    Err(err) => {
                        yield StreamEvent::Error(err);
                    }
                }
                return;
            }

            let mut frames = response.into_sse_stream();
            loop {
                let next = tokio::select! {
                    biased;
                    () = signal.cancelled() => break,
                    next = frames.next_event() => next,
                };
                match next {
                    Ok(Some(event)) => yield StreamEvent::Message(SseMessage::from(event)),
                    Ok(None) => break,
                    Err(err) => {
                        let recoverable = matches!(err, ApiError::InvalidEvent(_));
                        yield StreamEvent::Error(err);
                        if !recoverable {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(%url, "SSE stream closed");
        };

        SseSession::new(Box::pin(inner), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frames(chunks: &[&str]) -> SseEventStream {
        let chunks: Vec<Result<Bytes, ApiError>> = chunks
            .iter()
            .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        SseEventStream::new(Box::pin(stream::iter(chunks)))
    }

    #[test]
    fn test_parse_simple_event() {
        let event = parse_frame(b"data: hello world").unwrap().unwrap();
        assert_eq!(event.data, "hello world");
        assert_eq!(event.id, None);
        assert_eq!(event.event, None);
    }

    #[test]
    fn test_parse_event_with_id() {
        let event = parse_frame(b"id: 123\nevent: message\ndata: hello\n").unwrap().unwrap();
        assert_eq!(event.data, "hello");
        assert_eq!(event.id, Some("123".to_owned()));
        assert_eq!(event.event, Some("message".to_owned()));
    }

    #[test]
    fn test_parse_multiline_data() {
        let event = parse_frame(b"data: line 1\ndata: line 2\ndata: line 3\n").unwrap().unwrap();
        assert_eq!(event.data, "line 1\nline 2\nline 3");
    }

    #[test]
    fn test_only_one_leading_space_stripped() {
        let event = parse_frame(b"data:  indented\ndata:tight\n").unwrap().unwrap();
        assert_eq!(event.data, " indented\ntight");
    }

    #[test]
    fn test_comment_only_frame_has_no_event() {
        assert!(parse_frame(b": keep-alive\n").unwrap().is_none());
    }

    #[test]
    fn test_empty_data_line_dispatches_empty_message() {
        assert_eq!(parse_frame(b"data\n").unwrap().unwrap().data, "");
        assert_eq!(parse_frame(b"data:\n").unwrap().unwrap().data, "");
        assert_eq!(parse_frame(b"data\ndata\n").unwrap().unwrap().data, "\n");
        assert!(parse_frame(b"event: ping\nid: 4\n").unwrap().is_none());
    }

    #[test]
    fn test_retry_field() {
        let event = parse_frame(b"retry: 3000\ndata: x\n").unwrap().unwrap();
        assert_eq!(event.retry, Some(3000));
    }

    #[test]
    fn test_invalid_utf8_frame() {
        assert!(matches!(
            parse_frame(b"data: \xff\n"),
            Err(ApiError::InvalidEvent(_))
        ));
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let mut sse = frames(&["data: ev", "ent 1\n", "\ndata: event 2\r\n\r\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "event 1");
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "event 2");
        assert!(sse.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keep_alive_between_events_is_skipped() {
        let mut sse = frames(&["data: a\n\n: ping\n\ndata: b\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "a");
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "b");
        assert!(sse.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_trailing_event_is_discarded() {
        let mut sse = frames(&["data: complete\n\ndata: partial"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "complete");
        assert!(sse.next_event().await.unwrap().is_none());
    }

    #[test]
    fn test_message_json_decodes_on_demand() {
        let message: SseMessage<Vec<u32>> = SseMessage::new("[1,2,3]");
        assert_eq!(message.data, "[1,2,3]");
        assert_eq!(message.json().unwrap(), vec![1, 2, 3]);
    }
}
