//! Destination abstraction trait
//!
//! This module defines the Destination trait that every destination backend implements.

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{Classify, ErrorClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Destination operation errors
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("Destination quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Destination rejected credentials: {0}")]
    AuthError(String),

    #[error("Destination transport error: {0}")]
    Transport(String),

    #[error("Destination rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Destination object not found: {0}")]
    NotFound(String),

    #[error("Invalid destination path: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Classify for DestinationError {
    fn class(&self) -> ErrorClass {
        match self {
            DestinationError::Transport(_)
            | DestinationError::RateLimited { .. }
            | DestinationError::IoError(_) => ErrorClass::Transient,
            DestinationError::QuotaExceeded(_)
            | DestinationError::AuthError(_)
            | DestinationError::NotFound(_)
            | DestinationError::InvalidKey(_) => ErrorClass::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DestinationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for destination operations
pub type DestinationResult<T> = Result<T, DestinationError>;

/// Opaque handle to a destination folder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderRef(pub String);

impl FolderRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source metadata preserved on the uploaded object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub object_id: String,
    pub name: String,
    pub mime_type: Option<String>,
    /// Free-form properties (source channel, uploader, timestamps)
    pub properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Destination abstraction trait
///
/// All destination backends implement this trait so the pipeline never couples to a
/// particular storage service.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Return the folder at `path`, creating each missing level
    async fn ensure_folder(&self, path: &[String]) -> DestinationResult<FolderRef>;

    /// Upload an object into `folder` and return its destination reference
    async fn upload(
        &self,
        folder: &FolderRef,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> DestinationResult<String>;

    /// Look up an object previously uploaded for `object_id` in `folder`
    async fn find_by_source_id(
        &self,
        folder: &FolderRef,
        object_id: &str,
    ) -> DestinationResult<Option<String>>;

    /// Attach a human readable description to an uploaded object
    async fn describe(&self, destination_ref: &str, description: &str) -> DestinationResult<()>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
