use anyhow::Result;
use ferry_core::{AnnotatorConfig, AnnotatorProvider};
use std::sync::Arc;

use crate::annotator::{Annotator, NoopAnnotator};
#[cfg(feature = "plugin-google-vision")]
use crate::google_vision::{GoogleVisionAnnotator, GoogleVisionConfig};
#[cfg(feature = "plugin-google-vision")]
use crate::router::MediaRouter;
#[cfg(feature = "plugin-google-vision")]
use crate::video_intelligence::{VideoIntelligenceAnnotator, VideoIntelligenceConfig};

/// Create the annotator selected by the configuration
pub fn create_annotator(config: &AnnotatorConfig) -> Result<Arc<dyn Annotator>> {
    let annotator: Arc<dyn Annotator> = match config.provider {
        AnnotatorProvider::None => Arc::new(NoopAnnotator),

        #[cfg(feature = "plugin-google-vision")]
        AnnotatorProvider::GoogleVision => {
            let vision = GoogleVisionConfig::from_annotator_config(config)?;
            let image: Arc<dyn Annotator> = Arc::new(GoogleVisionAnnotator::new(vision)?);
            let video: Option<Arc<dyn Annotator>> = if config.video_enabled {
                let video = VideoIntelligenceConfig::from_annotator_config(config)?;
                Some(Arc::new(VideoIntelligenceAnnotator::new(video)?))
            } else {
                None
            };
            Arc::new(MediaRouter::new(image, video))
        }

        #[cfg(not(feature = "plugin-google-vision"))]
        AnnotatorProvider::GoogleVision => {
            return Err(anyhow::anyhow!(
                "Google Vision annotator not available (plugin-google-vision feature not enabled)"
            ))
        }
    };

    tracing::info!(annotator = annotator.name(), "Annotator initialized");
    Ok(annotator)
}
