//! Google Cloud Video Intelligence annotator
//!
//! Videos are sent inline to `videos:annotate`, which answers with a long-running
//! operation. The operation is polled until it is done or the configured wait runs out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::{AnnotatorConfig, Tag, TagKind};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;
use tokio::time::Instant;

use crate::annotator::{Annotator, AnnotatorError, AnnotatorResult};

const SOURCE_NAME: &str = "google_video_intelligence";

/// Inline `inputContent` shares the 10 MiB JSON request limit with images
const MAX_VIDEO_BYTES: usize = 7 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct VideoIntelligenceConfig {
    pub api_key: String,
    /// Full `videos:annotate` URL; operations are fetched relative to its parent
    pub endpoint: String,
    pub features: Vec<String>,
    pub min_score: f32,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl VideoIntelligenceConfig {
    pub fn from_annotator_config(config: &AnnotatorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("GOOGLE_VISION_API_KEY must be set for video annotation")?;
        Ok(Self {
            api_key,
            endpoint: config.video_endpoint.clone(),
            features: config.video_features.clone(),
            min_score: config.min_score,
            poll_interval: config.video_poll_interval,
            max_wait: config.video_max_wait,
        })
    }
}

pub struct VideoIntelligenceAnnotator {
    http_client: reqwest::Client,
    config: VideoIntelligenceConfig,
    operations_base: String,
}

impl Debug for VideoIntelligenceAnnotator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoIntelligenceAnnotator")
            .field("endpoint", &self.config.endpoint)
            .field("features", &self.config.features)
            .finish()
    }
}

impl VideoIntelligenceAnnotator {
    pub fn new(config: VideoIntelligenceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client for Video Intelligence API")?;

        // https://videointelligence.googleapis.com/v1/videos:annotate -> .../v1
        let operations_base = config
            .endpoint
            .rsplit_once('/')
            .map(|(base, _)| base.to_string())
            .with_context(|| format!("Invalid video annotate endpoint: {}", config.endpoint))?;

        Ok(Self {
            http_client,
            config,
            operations_base,
        })
    }

    fn parse_feature(feature: &str) -> Option<&'static str> {
        match feature.to_uppercase().as_str() {
            "LABEL_DETECTION" => Some("LABEL_DETECTION"),
            "TEXT_DETECTION" => Some("TEXT_DETECTION"),
            "SHOT_CHANGE_DETECTION" => Some("SHOT_CHANGE_DETECTION"),
            _ => None,
        }
    }

    fn requested_features(&self) -> BTreeSet<&'static str> {
        let features: BTreeSet<_> = self
            .config
            .features
            .iter()
            .filter_map(|f| Self::parse_feature(f))
            .collect();
        if features.is_empty() {
            BTreeSet::from(["LABEL_DETECTION"])
        } else {
            features
        }
    }

    fn is_video(mime_type: &str) -> bool {
        let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
        essence
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("video/"))
    }

    /// Start annotation and return the operation name
    async fn start_operation(&self, video_data: &[u8]) -> AnnotatorResult<String> {
        let url = format!("{}?key={}", self.config.endpoint, self.config.api_key);

        use base64::Engine;
        let request_body = json!({
            "inputContent": base64::engine::general_purpose::STANDARD.encode(video_data),
            "features": self.requested_features().into_iter().collect::<Vec<_>>(),
        });

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AnnotatorError::Transport(e.to_string()))?;
        let response = check_status(response).await?;

        let started: OperationStarted = response
            .json()
            .await
            .map_err(|e| AnnotatorError::Malformed(e.to_string()))?;
        Ok(started.name)
    }

    /// Poll the operation until it reports `done`
    async fn wait_for_operation(&self, name: &str) -> AnnotatorResult<AnnotateVideoResponse> {
        let url = format!(
            "{}/{}?key={}",
            self.operations_base,
            name.trim_start_matches('/'),
            self.config.api_key
        );
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            let response = self
                .http_client
                .get(&url)
                .send()
                .await
                .map_err(|e| AnnotatorError::Transport(e.to_string()))?;
            let response = check_status(response).await?;
            let operation: Operation = response
                .json()
                .await
                .map_err(|e| AnnotatorError::Malformed(e.to_string()))?;

            if operation.done {
                if let Some(error) = operation.error {
                    return Err(error.into_annotator_error());
                }
                return operation.response.ok_or_else(|| {
                    AnnotatorError::Malformed(format!("Operation {} finished without a response", name))
                });
            }

            if Instant::now() + self.config.poll_interval > deadline {
                return Err(AnnotatorError::Transport(format!(
                    "Operation {} not done after {:?}",
                    name, self.config.max_wait
                )));
            }
            tracing::debug!(operation = name, "Video annotation still running");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn process_results(response: &AnnotateVideoResponse, min_score: f32) -> AnnotatorResult<Vec<Tag>> {
        let mut tags = Vec::new();

        for result in &response.annotation_results {
            if let Some(error) = &result.error {
                // Partial results still carry whatever the other features found
                tracing::warn!(code = ?error.code, message = ?error.message, "Video annotation result error");
                if result.is_empty() {
                    return Err(error.clone().into_annotator_error());
                }
            }

            for (kind, labels) in [
                (TagKind::VideoLabel, &result.segment_label_annotations),
                (TagKind::ShotLabel, &result.shot_label_annotations),
            ] {
                for label in labels {
                    let Some(description) = label.entity.as_ref().and_then(|e| e.description.as_deref())
                    else {
                        continue;
                    };
                    let confidence = label.confidence();
                    if confidence >= min_score {
                        tags.push(Tag::new(kind, description, confidence, SOURCE_NAME));
                    }
                }
            }

            for text in &result.text_annotations {
                let text = text.text.trim();
                if !text.is_empty() {
                    tags.push(Tag::new(TagKind::VideoText, text, 1.0, SOURCE_NAME));
                }
            }
        }

        Ok(tags)
    }
}

async fn check_status(response: Response) -> AnnotatorResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

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
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => AnnotatorError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AnnotatorError::Unauthorized(format!("{} - {}", status, error_text))
        }
        StatusCode::BAD_REQUEST if error_text.contains("API key") => {
            AnnotatorError::Unauthorized(format!("{} - {}", status, error_text))
        }
        s if s.is_server_error() => AnnotatorError::Transport(format!("{} - {}", status, error_text)),
        _ => AnnotatorError::Malformed(format!("{} - {}", status, error_text)),
    })
}

#[async_trait]
impl Annotator for VideoIntelligenceAnnotator {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn analyze(&self, data: Bytes, mime_type: &str) -> AnnotatorResult<Vec<Tag>> {
        if !Self::is_video(mime_type) {
            return Err(AnnotatorError::UnsupportedFormat(mime_type.to_string()));
        }
        if data.len() > MAX_VIDEO_BYTES {
            return Err(AnnotatorError::UnsupportedFormat(format!(
                "{} of {} bytes exceeds the {} byte inline limit",
                mime_type,
                data.len(),
                MAX_VIDEO_BYTES
            )));
        }

        let operation = self.start_operation(&data).await?;
        tracing::debug!(%operation, "Video annotation started");
        let response = self.wait_for_operation(&operation).await?;
        let tags = Self::process_results(&response, self.config.min_score)?;

        tracing::info!(
            tags = tags.len(),
            features = ?self.config.features,
            "Google Video Intelligence analysis completed"
        );

        Ok(tags)
    }
}

// Video Intelligence REST response types
#[derive(Debug, Deserialize)]
struct OperationStarted {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    done: bool,
    error: Option<RpcStatus>,
    response: Option<AnnotateVideoResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateVideoResponse {
    #[serde(default)]
    annotation_results: Vec<VideoAnnotationResults>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoAnnotationResults {
    #[serde(default)]
    segment_label_annotations: Vec<LabelAnnotation>,
    #[serde(default)]
    shot_label_annotations: Vec<LabelAnnotation>,
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<RpcStatus>,
}

impl VideoAnnotationResults {
    fn is_empty(&self) -> bool {
        self.segment_label_annotations.is_empty()
            && self.shot_label_annotations.is_empty()
            && self.text_annotations.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    entity: Option<Entity>,
    #[serde(default)]
    segments: Vec<LabelSegment>,
}

impl LabelAnnotation {
    /// Best confidence over the segments the label was seen in
    fn confidence(&self) -> f32 {
        self.segments
            .iter()
            .filter_map(|s| s.confidence)
            .fold(0.0_f64, f64::max) as f32
    }
}

#[derive(Debug, Deserialize)]
struct Entity {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelSegment {
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcStatus {
    code: Option<i32>,
    message: Option<String>,
}

impl RpcStatus {
    /// Map google.rpc.Code values onto annotator errors
    fn into_annotator_error(self) -> AnnotatorError {
        let message = self.message.unwrap_or_default();
        match self.code {
            Some(3) => AnnotatorError::UnsupportedFormat(message),
            Some(8) => AnnotatorError::RateLimited { retry_after: None },
            Some(4) | Some(13) | Some(14) => AnnotatorError::Transport(message),
            Some(7) | Some(16) => AnnotatorError::Unauthorized(message),
            code => AnnotatorError::Malformed(format!("{:?} - {}", code, message)),
        }
    }
}
