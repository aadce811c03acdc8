use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{ApiContext, ApiOptions};
use crate::error::ApiError;
use crate::method::HttpMethod;
use crate::request::PendingRequest;

/// Parse a response body as JSON into `T`
///
/// # Errors
///
/// Returns [`ApiError::Decode`] when the text is not valid JSON for `T`.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(ApiError::Decode)
}

impl ApiContext {
    /// [`execute`](Self::execute), then decode the successful body as JSON.
    ///
    /// The payload is not validated against any schema; `T` is trusted to
    /// match what the server sends. Transport and status failures pass
    /// through unchanged.
    pub fn execute_typed<T, B>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        options: Option<&ApiOptions>,
    ) -> PendingRequest<T>
    where
        T: DeserializeOwned + Send + 'static,
        B: Serialize + ?Sized,
    {
        self.execute(method, path, body, options)
            .and_then(|text| decode_json(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Counter {
        a: i64,
    }

    #[test]
    fn test_decode_object() {
        let counter: Counter = decode_json(r#"{"a":1}"#).unwrap();
        assert_eq!(counter, Counter { a: 1 });
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let err = decode_json::<Counter>("not json").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode_json::<Counter>(r#"{"a":"one"}"#).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
