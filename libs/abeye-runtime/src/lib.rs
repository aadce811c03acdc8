//! Runtime support for generated OpenAPI clients
//!
//! Generated client methods call into this crate for everything that
//! actually touches the network:
//!
//! - resolve the API base URL from per-call [`ApiOptions`] or the shared [`ApiContext`]
//! - issue a request and read the body as text ([`ApiContext::execute`])
//! - decode a JSON body into a typed result ([`ApiContext::execute_typed`])
//! - subscribe to a Server-Sent Events endpoint ([`ApiContext::open_stream`])
//!
//! Requests go through a pluggable [`Transport`]; the default one is backed by
//! `reqwest`. Every in-flight request can be cancelled through its
//! [`CancelHandle`]. Nothing is retried.
//!
//! # Examples
//!
//! ## Typed JSON request
//!
//! ```no_run
//! use abeye_runtime::{ApiContext, ApiOptions, HttpMethod};
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Deserialize)]
//! struct Pet {
//!     id: u64,
//!     name: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = ApiContext::new()?.with_api_base("https://petstore.example");
//! let options = ApiOptions::new().header("Authorization", "Bearer token")?;
//!
//! let pet: Pet = ctx
//!     .execute_typed(HttpMethod::Post, "/pets", Some(&json!({"name": "Rex"})), Some(&options))
//!     .await?;
//! println!("created pet {} ({})", pet.id, pet.name);
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! ```no_run
//! use std::time::Duration;
//! use abeye_runtime::{ApiContext, HttpMethod, NO_BODY};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = ApiContext::new()?.with_api_base("https://petstore.example");
//! let request = ctx.execute(HttpMethod::Get, "/pets", NO_BODY, None);
//! let cancel = request.cancel_handle();
//!
//! match tokio::time::timeout(Duration::from_secs(5), request).await {
//!     Ok(body) => println!("{}", body?),
//!     Err(_) => {
//!         cancel.cancel(Some("timed out"));
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## SSE Streaming
//!
//! ```no_run
//! use abeye_runtime::{ApiContext, HttpMethod, StreamEvent};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = ApiContext::new()?.with_api_base("https://petstore.example");
//! let mut events = ctx.open_stream::<u64>(HttpMethod::Get, "/pets/updates", None);
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         StreamEvent::Message(message) => println!("pet changed: {}", message.json()?),
//!         StreamEvent::Error(err) => eprintln!("stream error: {err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod json;
mod method;
mod query;
mod request;
mod response;
mod sse;
mod transport;

// Re-export public API
pub use config::{API_BASE_ENV, ApiContext, ApiOptions};
pub use error::{ApiError, ErrorKind};
pub use json::decode_json;
pub use method::HttpMethod;
pub use query::with_query;
pub use request::{CancelHandle, NO_BODY, PendingRequest};
pub use response::{BoxStream, FetchResponse};
pub use sse::{
    SseCancelHandle, SseEvent, SseEventStream, SseListener, SseMessage, SseSession, StreamEvent,
};
pub use transport::{
    AbortReason, FetchInit, FnTransport, ReqwestTransport, Transport, transport_fn,
};

// Re-export commonly used types from dependencies
pub use http::{HeaderMap, HeaderValue, StatusCode};
pub use tokio_util::sync::CancellationToken;
