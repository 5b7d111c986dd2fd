//! Google Cloud Vision API annotator for still images

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{AnnotatorConfig, Tag, TagKind};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::annotator::{Annotator, AnnotatorError, AnnotatorResult};

const SOURCE_NAME: &str = "google_vision";

/// Vision rejects JSON requests above 10 MiB; base64 inflates by 4/3
const MAX_IMAGE_BYTES: usize = 7 * 1024 * 1024;

const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/x-icon",
    "image/tiff",
];

/// Google Cloud Vision annotator configuration
#[derive(Debug, Clone)]
pub struct GoogleVisionConfig {
    pub api_key: String,
    pub endpoint: String,
    /// Features to request (LABEL_DETECTION, TEXT_DETECTION, ...)
    pub features: Vec<String>,
    /// Minimum score for scored annotations (0.0-1.0)
    pub min_score: f32,
    pub max_results: u32,
}

impl GoogleVisionConfig {
    pub fn from_annotator_config(config: &AnnotatorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("GOOGLE_VISION_API_KEY must be set for the google_vision annotator")?;
        Ok(Self {
            api_key,
            endpoint: config.endpoint.clone(),
            features: config.features.clone(),
            min_score: config.min_score,
            max_results: config.max_results,
        })
    }
}

/// Google Cloud Vision annotator
pub struct GoogleVisionAnnotator {
    http_client: reqwest::Client,
    config: GoogleVisionConfig,
}

impl Debug for GoogleVisionAnnotator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GoogleVisionAnnotator")
            .field("endpoint", &self.config.endpoint)
            .field("features", &self.config.features)
            .finish()
    }
}

impl GoogleVisionAnnotator {
    pub fn new(config: GoogleVisionConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client for Google Vision API")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Convert feature string to API feature enum
    fn parse_feature(feature: &str) -> &'static str {
        match feature.to_uppercase().as_str() {
            "LABEL_DETECTION" => "LABEL_DETECTION",
            "TEXT_DETECTION" => "TEXT_DETECTION",
            "DOCUMENT_TEXT_DETECTION" => "DOCUMENT_TEXT_DETECTION",
            "FACE_DETECTION" => "FACE_DETECTION",
            "OBJECT_LOCALIZATION" => "OBJECT_LOCALIZATION",
            "LANDMARK_DETECTION" => "LANDMARK_DETECTION",
            "LOGO_DETECTION" => "LOGO_DETECTION",
            "WEB_DETECTION" => "WEB_DETECTION",
            _ => "LABEL_DETECTION",
        }
    }

    /// Distinct API features to request; unknown names collapse into labels
    fn requested_features(&self) -> BTreeSet<&'static str> {
        self.config
            .features
            .iter()
            .map(|f| Self::parse_feature(f))
            .collect()
    }

    fn is_supported(mime_type: &str) -> bool {
        let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
        SUPPORTED_MIME_TYPES
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(essence))
    }

    /// Annotate image using Google Cloud Vision API
    async fn annotate_image(&self, image_data: &[u8]) -> AnnotatorResult<AnnotateImageResponse> {
        let url = format!("{}?key={}", self.config.endpoint, self.config.api_key);

        let feature_requests: Vec<serde_json::Value> = self
            .requested_features()
            .into_iter()
            .map(|f| {
                json!({
                    "type": f,
                    "maxResults": self.config.max_results
                })
            })
            .collect();

        use base64::Engine;
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_data);

        let request_body = json!({
            "requests": [{
                "image": {
                    "content": image_base64
                },
                "features": feature_requests
            }]
        });

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AnnotatorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => AnnotatorError::RateLimited { retry_after },
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    AnnotatorError::Unauthorized(format!("{} - {}", status, error_text))
                }
                StatusCode::BAD_REQUEST if error_text.contains("API key") => {
                    AnnotatorError::Unauthorized(format!("{} - {}", status, error_text))
                }
                s if s.is_server_error() => {
                    AnnotatorError::Transport(format!("{} - {}", status, error_text))
                }
                _ => AnnotatorError::Malformed(format!("{} - {}", status, error_text)),
            });
        }

        let vision_response: VisionResponse = response
            .json()
            .await
            .map_err(|e| AnnotatorError::Malformed(e.to_string()))?;

        let first = vision_response
            .responses
            .and_then(|responses| responses.into_iter().next())
            .unwrap_or_default();

        if let Some(error) = &first.error {
            let message = error.message.clone().unwrap_or_default();
            // google.rpc.Code values
            return Err(match error.code {
                Some(3) => AnnotatorError::UnsupportedFormat(message),
                Some(8) => AnnotatorError::RateLimited { retry_after: None },
                Some(4) | Some(13) | Some(14) => AnnotatorError::Transport(message),
                Some(7) | Some(16) => AnnotatorError::Unauthorized(message),
                _ => AnnotatorError::Malformed(format!("{:?} - {}", error.code, message)),
            });
        }

        Ok(first)
    }

    /// Turn the first image response into tags
    fn process_results(response: &AnnotateImageResponse, min_score: f32) -> Vec<Tag> {
        let mut tags = Vec::new();
        let passes = |score: Option<f64>| score.unwrap_or(0.0) as f32 >= min_score;

        if let Some(labels) = &response.label_annotations {
            for label in labels.iter().filter(|l| passes(l.score)) {
                if let Some(description) = &label.description {
                    tags.push(Tag::new(
                        TagKind::Label,
                        description,
                        label.score.unwrap_or(0.0) as f32,
                        SOURCE_NAME,
                    ));
                }
            }
        }

        // The first text annotation is the full detected text
        if let Some(text) = response
            .text_annotations
            .as_ref()
            .and_then(|texts| texts.first())
            .and_then(|t| t.description.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            tags.push(Tag::new(TagKind::Text, text, 1.0, SOURCE_NAME));
        }

        if let Some(faces) = &response.face_annotations {
            for face in faces {
                let confidence = face.detection_confidence.unwrap_or(0.0) as f32;
                if confidence < min_score {
                    continue;
                }
                let description = match face.joy_likelihood.as_deref() {
                    Some("LIKELY") | Some("VERY_LIKELY") => "face (joy)",
                    _ => "face",
                };
                tags.push(Tag::new(TagKind::Face, description, confidence, SOURCE_NAME));
            }
        }

        if let Some(objects) = &response.localized_object_annotations {
            for object in objects.iter().filter(|o| passes(o.score)) {
                if let Some(name) = &object.name {
                    tags.push(Tag::new(
                        TagKind::Object,
                        name,
                        object.score.unwrap_or(0.0) as f32,
                        SOURCE_NAME,
                    ));
                }
            }
        }

        for (kind, annotations) in [
            (TagKind::Landmark, &response.landmark_annotations),
            (TagKind::Logo, &response.logo_annotations),
        ] {
            if let Some(annotations) = annotations {
                for annotation in annotations.iter().filter(|a| passes(a.score)) {
                    if let Some(description) = &annotation.description {
                        tags.push(Tag::new(
                            kind,
                            description,
                            annotation.score.unwrap_or(0.0) as f32,
                            SOURCE_NAME,
                        ));
                    }
                }
            }
        }

        if let Some(entities) = response
            .web_detection
            .as_ref()
            .and_then(|w| w.web_entities.as_ref())
        {
            for entity in entities.iter().filter(|e| passes(e.score)) {
                if let Some(description) = &entity.description {
                    tags.push(Tag::new(
                        TagKind::WebEntity,
                        description,
                        entity.score.unwrap_or(0.0) as f32,
                        SOURCE_NAME,
                    ));
                }
            }
        }

        tags
    }
}

#[async_trait]
impl Annotator for GoogleVisionAnnotator {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn analyze(&self, data: Bytes, mime_type: &str) -> AnnotatorResult<Vec<Tag>> {
        if !Self::is_supported(mime_type) {
            return Err(AnnotatorError::UnsupportedFormat(mime_type.to_string()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(AnnotatorError::UnsupportedFormat(format!(
                "{} of {} bytes exceeds the {} byte request limit",
                mime_type,
                data.len(),
                MAX_IMAGE_BYTES
            )));
        }

        let response = self.annotate_image(&data).await?;
        let tags = Self::process_results(&response, self.config.min_score);

        tracing::info!(
            tags = tags.len(),
            features = ?self.config.features,
            "Google Cloud Vision analysis completed"
        );

        Ok(tags)
    }
}

// Google Cloud Vision API response types
#[derive(Debug, Deserialize)]
struct VisionResponse {
    responses: Option<Vec<AnnotateImageResponse>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    label_annotations: Option<Vec<EntityAnnotation>>,
    text_annotations: Option<Vec<EntityAnnotation>>,
    face_annotations: Option<Vec<FaceAnnotation>>,
    localized_object_annotations: Option<Vec<LocalizedObjectAnnotation>>,
    landmark_annotations: Option<Vec<EntityAnnotation>>,
    logo_annotations: Option<Vec<EntityAnnotation>>,
    web_detection: Option<WebDetection>,
    error: Option<VisionError>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    description: Option<String>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaceAnnotation {
    detection_confidence: Option<f64>,
    joy_likelihood: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalizedObjectAnnotation {
    name: Option<String>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebDetection {
    web_entities: Option<Vec<WebEntity>>,
}

#[derive(Debug, Deserialize)]
struct WebEntity {
    score: Option<f64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisionError {
    code: Option<i32>,
    message: Option<String>,
}
