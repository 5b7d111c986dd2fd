//! Error classification for pipeline stages
//!
//! Every collaborator error is mapped onto an [`ErrorClass`] so the pipeline can decide
//! between retrying with backoff and failing the object for good. [`StageError`] carries
//! that decision together with the underlying error.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// How a failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, rate limits, transport failures. Retried with backoff.
    Transient,
    /// Not found, unsupported, auth failure, quota exhausted. Never retried.
    Permanent,
    /// Bad input from a caller. Reported synchronously, never retried.
    Validation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Validation => write!(f, "validation"),
        }
    }
}

/// Implemented by collaborator error enums so they can be turned into a [`StageError`]
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// Server supplied minimum wait before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Stage execution error that is either transient (retry) or permanent (fail now)
#[derive(Debug)]
pub struct StageError {
    inner: anyhow::Error,
    class: ErrorClass,
    retry_after: Option<Duration>,
}

impl StageError {
    /// Create a transient error
    ///
    /// Transient errors are retried according to the retry policy until the stage's
    /// attempt budget is spent.
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            class: ErrorClass::Transient,
            retry_after: None,
        }
    }

    /// Create a permanent error
    ///
    /// Permanent errors end the object in FAILED without another attempt.
    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            class: ErrorClass::Permanent,
            retry_after: None,
        }
    }

    /// Wrap a collaborator error, keeping its own classification and retry hint
    pub fn classify<E>(err: E) -> Self
    where
        E: Classify + std::error::Error + Send + Sync + 'static,
    {
        let class = err.class();
        let retry_after = err.retry_after();
        Self {
            inner: anyhow::Error::new(err),
            class,
            retry_after,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// Check if this error should be retried
    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Get the inner error
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Consume self and return the inner error
    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for StageError {
    /// Unclassified errors (local I/O and the like) are treated as transient
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err)
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(err)
    }
}

/// Extension trait for marking results as permanent failures
pub trait StageResultExt<T> {
    /// Convert an error into a permanent [`StageError`]
    fn permanent(self) -> Result<T, StageError>;
}

impl<T, E> StageResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn permanent(self) -> Result<T, StageError> {
        self.map_err(StageError::permanent)
    }
}
