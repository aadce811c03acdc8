use http::StatusCode;
use thiserror::Error;

/// Coarse classification of an [`ApiError`].
///
/// Generated call sites that only need to branch on the failure family can
/// match on this instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a usable response: network failure,
    /// cancellation, or a broken body stream.
    Transport,
    /// The server answered with a non-success status.
    HttpStatus,
    /// The response body was not valid JSON for the requested type.
    Decode,
    /// The request could not be assembled.
    Build,
}

/// Every failure surfaced by the runtime
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request aborted{}", abort_suffix(.reason))]
    Aborted { reason: Option<String> },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("HTTP error: status={status}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("malformed event: {0}")]
    InvalidEvent(String),

    #[error("failed to serialize request body: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("failed to encode query string: {0}")]
    Query(#[from] serde_urlencoded::ser::Error),
}

impl ApiError {
    /// Failure family of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Aborted { .. }
            | Self::Connection(_)
            | Self::Timeout(_)
            | Self::Transport(_)
            | Self::Body(_) => ErrorKind::Transport,
            Self::Status { .. } => ErrorKind::HttpStatus,
            Self::Decode(_) | Self::InvalidEvent(_) => ErrorKind::Decode,
            Self::Serialize(_) | Self::InvalidHeader(_) | Self::InvalidMethod(_) | Self::Query(_) => {
                ErrorKind::Build
            }
        }
    }

    /// Returns `true` when the failure was caused by cancelling the request.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Status code of a non-success response, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Body text of a non-success response, if this is one.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }
}

fn abort_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_connect() {
            ApiError::Connection(err.to_string())
        } else {
            ApiError::Transport(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_display_with_reason() {
        let err = ApiError::Aborted {
            reason: Some("user navigated away".to_owned()),
        };
        assert_eq!(err.to_string(), "request aborted: user navigated away");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_aborted());
    }

    #[test]
    fn test_aborted_display_without_reason() {
        let err = ApiError::Aborted { reason: None };
        assert_eq!(err.to_string(), "request aborted");
    }

    #[test]
    fn test_status_accessors() {
        let err = ApiError::Status {
            status: StatusCode::NOT_FOUND,
            body: "no such pet".to_owned(),
        };
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.body(), Some("no such pet"));
        assert!(!err.is_aborted());
    }

    #[test]
    fn test_decode_kind() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = ApiError::Decode(parse_err);
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.status(), None);
        assert_eq!(err.body(), None);
    }
}
