pub mod object;
pub mod record;
pub mod report;
pub mod tag;

pub use object::SourceObject;
pub use record::{MigrationRecord, MigrationStatus, Stage};
pub use report::{FailedObject, MigrationReport, PipelineOutcome, SkipReason, StoreStats};
pub use tag::{dedup_tags, describe, Tag, TagKind};
