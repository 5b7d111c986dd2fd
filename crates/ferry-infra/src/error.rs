//! HTTP error response body
//!
//! `IntoResponse` for the intake error lives in ferry-api next to the handlers.

use serde::Serialize;

/// Standard error response format for HTTP APIs
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Whether resending the same request later may succeed
    pub recoverable: bool,
}
