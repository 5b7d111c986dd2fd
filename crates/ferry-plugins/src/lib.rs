//! Ferry annotators
//!
//! An [`Annotator`] turns object bytes into [`ferry_core::Tag`]s. Annotation is optional
//! for a migration: callers treat permanent annotator errors as "no tags".
//!
//! The Google provider splits images and videos between Vision and Video Intelligence
//! through a [`MediaRouter`].

pub mod annotator;
pub mod factory;
#[cfg(feature = "plugin-google-vision")]
pub mod google_vision;
pub mod router;
#[cfg(feature = "plugin-google-vision")]
pub mod video_intelligence;

pub use annotator::{Annotator, AnnotatorError, AnnotatorResult, NoopAnnotator};
pub use factory::create_annotator;
#[cfg(feature = "plugin-google-vision")]
pub use google_vision::{GoogleVisionAnnotator, GoogleVisionConfig};
pub use router::MediaRouter;
#[cfg(feature = "plugin-google-vision")]
pub use video_intelligence::{VideoIntelligenceAnnotator, VideoIntelligenceConfig};
