//! Contract of the external query transport.
//!
//! The transport owns connections, authentication and retries. The grouping
//! core hands it one request body at a time and blocks on the response.

use serde_json::Value;

use crate::error::{Error, Result};

/// Client side of the search engine
pub trait Transport: Send + Sync {
    /// Run a search request (`POST <index>/_search`) and return the raw
    /// response body.
    ///
    /// Failures must be reported as [`Error::Backend`].
    fn search(&self, index: &str, body: &Value) -> Result<Value>;

    /// Fetch the mapping of an index (`GET <index>/_mapping`).
    fn mapping(&self, index: &str) -> Result<Value>;
}

/// Turn an error embedded in a response body (`{"error": {...}, "status": N}`)
/// into [`Error::Backend`]. Transports that hand back error bodies as regular
/// responses rely on the core calling this before parsing.
pub fn check_response(response: &Value) -> Result<()> {
    let Some(error) = response.get("error") else {
        return Ok(());
    };

    let status = response
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());
    let message = match error {
        Value::String(s) => s.clone(),
        other => {
            let kind = other.get("type").and_then(Value::as_str).unwrap_or("error");
            let reason = other
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown reason");
            format!("{}: {}", kind, reason)
        }
    };
    Err(Error::Backend { status, message })
}
