use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{Classify, ErrorClass, Tag};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnotatorError {
    #[error("Unsupported format for annotation: {0}")]
    UnsupportedFormat(String),

    #[error("Annotator transport error: {0}")]
    Transport(String),

    #[error("Annotator rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Annotator rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Malformed annotator response: {0}")]
    Malformed(String),
}

impl Classify for AnnotatorError {
    fn class(&self) -> ErrorClass {
        match self {
            AnnotatorError::Transport(_) | AnnotatorError::RateLimited { .. } => {
                ErrorClass::Transient
            }
            AnnotatorError::UnsupportedFormat(_)
            | AnnotatorError::Unauthorized(_)
            | AnnotatorError::Malformed(_) => ErrorClass::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AnnotatorError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type AnnotatorResult<T> = Result<T, AnnotatorError>;

/// Derives tags from object content
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Name recorded as the `source` of produced tags
    fn name(&self) -> &str;

    async fn analyze(&self, data: Bytes, mime_type: &str) -> AnnotatorResult<Vec<Tag>>;
}

/// Annotator used when no provider is configured; always yields no tags
#[derive(Debug, Default, Clone)]
pub struct NoopAnnotator;

#[async_trait]
impl Annotator for NoopAnnotator {
    fn name(&self) -> &str {
        "none"
    }

    async fn analyze(&self, _data: Bytes, _mime_type: &str) -> AnnotatorResult<Vec<Tag>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_annotator_returns_no_tags() {
        let tags = NoopAnnotator
            .analyze(Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn unsupported_format_is_permanent() {
        let err = AnnotatorError::UnsupportedFormat("video/mp4".to_string());
        assert_eq!(err.class(), ErrorClass::Permanent);
        let err = AnnotatorError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }
}
