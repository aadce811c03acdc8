use serde::Serialize;

use crate::error::ApiError;

/// Append `query` to `path` as a URL-encoded query string.
///
/// Generated operations with query parameters build their path with this
/// before calling into the executor. An empty query leaves the path as is;
/// a path that already has a query gets the new pairs appended with `&`.
///
/// # Errors
///
/// Returns [`ApiError::Query`] when `query` is not a flat map or struct.
pub fn with_query<Q: Serialize + ?Sized>(path: &str, query: &Q) -> Result<String, ApiError> {
    let encoded = serde_urlencoded::to_string(query)?;
    if encoded.is_empty() {
        return Ok(path.to_owned());
    }
    let separator = if path.contains('?') { '&' } else { '?' };
    Ok(format!("{path}{separator}{encoded}"))
}
