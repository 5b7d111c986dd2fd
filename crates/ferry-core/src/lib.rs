//! Ferry Core Library
//!
//! Domain models, error classification and configuration shared by every ferry crate.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{
    AnnotatorConfig, AnnotatorProvider, Config, DestinationBackend, DestinationConfig,
    DriveConfig, LogFormat, MigrationConfig, RealtimeConfig, RetryConfig, SlackConfig,
};
pub use error::{Classify, ErrorClass, StageError, StageResultExt};
pub use models::{
    FailedObject, MigrationRecord, MigrationReport, MigrationStatus, PipelineOutcome, SkipReason,
    SourceObject, Stage, StoreStats, Tag, TagKind,
};
