//! Intake errors and their HTTP rendering
//!
//! Handlers return `Result<impl IntoResponse, IntakeError>`; every error renders as a
//! JSON [`ErrorResponse`] with a status that tells the sender whether to retry.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use ferry_infra::{ErrorResponse, SignatureError};
use ferry_worker::AdmitError;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Intake queue is full")]
    QueueFull,

    #[error("Intake is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

enum LogLevel {
    Debug,
    Warn,
    Error,
}

impl IntakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IntakeError::Signature(_) => StatusCode::UNAUTHORIZED,
            IntakeError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            IntakeError::QueueFull | IntakeError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            IntakeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            IntakeError::Signature(_) => "signature",
            IntakeError::InvalidPayload(_) => "invalid_payload",
            IntakeError::QueueFull => "queue_full",
            IntakeError::ShuttingDown => "shutting_down",
            IntakeError::Internal(_) => "internal",
        }
    }

    /// Whether resending the same notification later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IntakeError::QueueFull | IntakeError::ShuttingDown | IntakeError::Internal(_)
        )
    }

    fn log_level(&self) -> LogLevel {
        match self {
            IntakeError::InvalidPayload(_) => LogLevel::Debug,
            IntakeError::Signature(_) | IntakeError::QueueFull | IntakeError::ShuttingDown => {
                LogLevel::Warn
            }
            IntakeError::Internal(_) => LogLevel::Error,
        }
    }

    /// Message shown to the caller; internal details stay in the logs
    fn client_message(&self) -> String {
        match self {
            IntakeError::Internal(_) => "Internal server error".to_string(),
            IntakeError::Signature(_) => "Invalid request signature".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<AdmitError> for IntakeError {
    fn from(err: AdmitError) -> Self {
        match err {
            AdmitError::QueueFull => IntakeError::QueueFull,
            AdmitError::ShuttingDown => IntakeError::ShuttingDown,
            AdmitError::Store(e) => IntakeError::Internal(e.to_string()),
        }
    }
}

fn log_error(error: &IntakeError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Notification rejected");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Notification rejected");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Notification failed");
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        log_error(&self);

        let details = match &self {
            IntakeError::Signature(e) => Some(e.to_string()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.client_message(),
            details,
            error_type: Some(self.error_type().to_string()),
            recoverable: self.is_recoverable(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
