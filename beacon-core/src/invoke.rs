//! The synchronous response to an `invoke` activity.

use serde::{Deserialize, Serialize};

/// What a handler returns for an `invoke` activity (§3.1, §4.2 step 9).
///
/// Unlike a normal turn's replies, which go out through the adapter,
/// an invoke response is returned synchronously to the caller that
/// sent the invoke — there is exactly one `InvokeResponse` per invoke
/// activity, never zero and never more than one.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// HTTP-style status code the caller should see (200, 400, 500, ...).
    pub status: u16,
    /// The response body.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub body: serde_json::Value,
}

impl InvokeResponse {
    /// A `200 OK` response with the given body.
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    /// A `200 OK` response with an empty body.
    pub fn accepted() -> Self {
        Self {
            status: 200,
            body: serde_json::Value::Null,
        }
    }

    /// An error response with the given status and a `{"error": reason}`
    /// body.
    pub fn error(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": reason.into() }),
        }
    }
}
