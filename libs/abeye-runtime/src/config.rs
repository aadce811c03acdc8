use std::sync::Arc;

use arc_swap::ArcSwap;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::ApiError;
use crate::transport::{ReqwestTransport, Transport};

/// Environment variable read by [`ApiContext::from_env`]
pub const API_BASE_ENV: &str = "ABEYE_API_BASE";

/// Per-call options accepted as the trailing argument of every operation.
///
/// All fields are optional; unset fields fall back to the [`ApiContext`].
#[derive(Clone, Default)]
pub struct ApiOptions {
    /// Transport used instead of the context default
    pub transport: Option<Arc<dyn Transport>>,
    /// Base URL used instead of the context default. Being set at all is what
    /// counts: `Some(String::new())` sends requests to the bare path.
    pub api_base: Option<String>,
    /// Extra headers sent with the request
    pub headers: HeaderMap,
}

impl std::fmt::Debug for ApiOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiOptions")
            .field("transport", &self.transport.as_ref().map(|_| ".."))
            .field("api_base", &self.api_base)
            .field("headers", &self.headers)
            .finish()
    }
}

impl ApiOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Add a header
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidHeader`] if the name or value is not valid.
    pub fn header<K, V>(mut self, key: K, value: V) -> Result<Self, ApiError>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Display,
        V::Error: std::fmt::Display,
    {
        let key = key
            .try_into()
            .map_err(|e| ApiError::InvalidHeader(format!("invalid header name: {e}")))?;
        let value = value
            .try_into()
            .map_err(|e| ApiError::InvalidHeader(format!("invalid header value: {e}")))?;
        self.headers.insert(key, value);
        Ok(self)
    }
}

/// Shared configuration owned by the application root.
///
/// Generated clients hold a clone of the context; clones share the default
/// base URL, so a [`set_api_base`](Self::set_api_base) during startup is seen
/// by every client created from it.
#[derive(Clone)]
pub struct ApiContext {
    api_base: Arc<ArcSwap<String>>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiContext")
            .field("api_base", &self.api_base.load().as_str())
            .finish_non_exhaustive()
    }
}

impl ApiContext {
    /// Context with an empty base URL and the `reqwest` transport
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new() -> Result<Self, ApiError> {
        Ok(Self::with_transport(Arc::new(ReqwestTransport::new()?)))
    }

    /// Context with an empty base URL and a custom default transport
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            api_base: Arc::new(ArcSwap::from_pointee(String::new())),
            transport,
        }
    }

    /// Create a context from environment variables
    ///
    /// Reads `ABEYE_API_BASE` (default: empty string).
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn from_env() -> Result<Self, ApiError> {
        let api_base = std::env::var(API_BASE_ENV).unwrap_or_default();
        Ok(Self::new()?.with_api_base(api_base))
    }

    #[must_use]
    pub fn with_api_base(self, api_base: impl Into<String>) -> Self {
        self.set_api_base(api_base);
        self
    }

    /// Replace the default base URL. The last call wins.
    pub fn set_api_base(&self, api_base: impl Into<String>) {
        let api_base = api_base.into();
        tracing::debug!(%api_base, "default API base updated");
        self.api_base.store(Arc::new(api_base));
    }

    /// Current default base URL
    #[must_use]
    pub fn api_base(&self) -> String {
        self.api_base.load().as_str().to_owned()
    }

    /// Base URL for a call: the per-call override when set, else the default
    #[must_use]
    pub fn resolve_api_base(&self, options: Option<&ApiOptions>) -> String {
        match options.and_then(|o| o.api_base.as_deref()) {
            Some(api_base) => api_base.to_owned(),
            None => self.api_base(),
        }
    }

    pub(crate) fn resolve_transport(&self, options: Option<&ApiOptions>) -> Arc<dyn Transport> {
        options
            .and_then(|o| o.transport.clone())
            .unwrap_or_else(|| Arc::clone(&self.transport))
    }
}
