//! Dispatches objects to an image or a video annotator by MIME type

use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::Tag;
use std::sync::Arc;

use crate::annotator::{Annotator, AnnotatorError, AnnotatorResult};

pub struct MediaRouter {
    name: String,
    image: Arc<dyn Annotator>,
    video: Option<Arc<dyn Annotator>>,
}

impl MediaRouter {
    pub fn new(image: Arc<dyn Annotator>, video: Option<Arc<dyn Annotator>>) -> Self {
        let name = match &video {
            Some(video) => format!("{}+{}", image.name(), video.name()),
            None => image.name().to_string(),
        };
        Self { name, image, video }
    }

    fn route(&self, mime_type: &str) -> Option<&Arc<dyn Annotator>> {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_ascii_lowercase();
        match essence.split_once('/') {
            Some(("image", _)) => Some(&self.image),
            Some(("video", _)) => self.video.as_ref(),
            _ => None,
        }
    }
}

#[async_trait]
impl Annotator for MediaRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, data: Bytes, mime_type: &str) -> AnnotatorResult<Vec<Tag>> {
        match self.route(mime_type) {
            Some(annotator) => {
                tracing::debug!(annotator = annotator.name(), mime_type, "Routing annotation");
                annotator.analyze(data, mime_type).await
            }
            None => Err(AnnotatorError::UnsupportedFormat(mime_type.to_string())),
        }
    }
}
