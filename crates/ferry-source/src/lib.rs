//! Ferry Source Library
//!
//! The [`SourceArchive`] trait lists and downloads archived objects; [`SlackArchive`]
//! implements it against the Slack Web API.

pub mod slack;
pub mod traits;

pub use slack::{SlackArchive, SlackFile};
pub use traits::{Download, Page, SourceArchive, SourceError, SourceMetadata, SourceResult};
