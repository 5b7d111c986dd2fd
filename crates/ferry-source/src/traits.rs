//! Source archive abstraction trait

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{Classify, ErrorClass, SourceObject};
use std::time::Duration;
use thiserror::Error;

/// Source operation errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source object not found: {0}")]
    NotFound(String),

    #[error("Source rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Source transport error: {0}")]
    Transport(String),

    #[error("Source rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Malformed source response: {0}")]
    Malformed(String),
}

impl Classify for SourceError {
    fn class(&self) -> ErrorClass {
        match self {
            SourceError::RateLimited { .. } | SourceError::Transport(_) => ErrorClass::Transient,
            SourceError::NotFound(_) | SourceError::Unauthorized(_) | SourceError::Malformed(_) => {
                ErrorClass::Permanent
            }
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// One page of the source listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub objects: Vec<SourceObject>,
    /// Token of the following page; `None` on the last page
    pub next_page_token: Option<String>,
}

/// What the source reported about downloaded bytes
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub mime_type: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Bytes,
    pub metadata: SourceMetadata,
}

/// Source archive abstraction
///
/// Implementations must be safe to call concurrently from many pipelines.
#[async_trait]
pub trait SourceArchive: Send + Sync {
    /// Fetch one listing page; `page_token = None` starts at the first page
    async fn list_page(&self, page_token: Option<&str>, page_size: usize) -> SourceResult<Page>;

    /// Fetch the full content of an object
    async fn download(&self, object: &SourceObject) -> SourceResult<Download>;
}
