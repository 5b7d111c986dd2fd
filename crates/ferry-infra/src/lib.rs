//! Ferry Infrastructure Library
//!
//! Shared infrastructure used by the ferry binary and HTTP surface:
//! - Telemetry initialization
//! - Request signature verification
//! - HTTP error response body

#[cfg(feature = "signature")]
pub mod signature;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;

// Re-export commonly used types
#[cfg(feature = "signature")]
pub use signature::{compute_signature, verify_signature, SignatureError};

#[cfg(feature = "observability-basic")]
pub use telemetry::init_telemetry;

pub use error::ErrorResponse;
