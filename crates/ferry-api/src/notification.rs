//! Realtime notification payloads
//!
//! Three shapes are accepted on the intake endpoint:
//! - a direct object notification (`{"object_id": .., "container_id": .., ..}`)
//! - a Slack `event_callback` envelope whose `file_shared` event carries `event.file`
//! - the Slack `url_verification` handshake

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use validator::Validate;

use ferry_core::SourceObject;
use ferry_source::SlackFile;

use crate::error::IntakeError;

const FILE_SHARED_EVENT: &str = "file_shared";

/// New object announced by the source
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ObjectNotification {
    #[validate(length(min = 1, max = 255, message = "object_id must be 1-255 characters"))]
    pub object_id: String,
    #[validate(length(min = 1, max = 255, message = "container_id must be 1-255 characters"))]
    pub container_id: String,
    #[validate(length(min = 1, max = 255, message = "uploader_id must be 1-255 characters"))]
    pub uploader_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[validate(length(min = 1, max = 2048, message = "content_ref must be 1-2048 characters"))]
    pub content_ref: String,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, message = "size_bytes cannot be negative"))]
    pub size_bytes: Option<i64>,
}

impl ObjectNotification {
    fn from_slack_file(file: SlackFile) -> Self {
        let object = file.into_source_object();
        Self {
            object_id: object.object_id,
            container_id: object.container_id,
            uploader_id: object.uploader_id,
            created_at: object.created_at,
            content_ref: object.content_ref.unwrap_or_default(),
            name: Some(object.name),
            mime_type: object.mime_type,
            file_type: object.file_type,
            size_bytes: object.size_bytes,
        }
    }

    pub fn into_source_object(self) -> SourceObject {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.object_id.clone());
        SourceObject {
            object_id: self.object_id,
            container_id: self.container_id,
            uploader_id: self.uploader_id,
            created_at: self.created_at,
            name,
            mime_type: self.mime_type,
            file_type: self.file_type.map(|t| t.to_lowercase()),
            size_bytes: self.size_bytes,
            content_ref: Some(self.content_ref),
        }
    }
}

/// What a verified request body asks for
#[derive(Debug)]
pub enum Payload {
    /// URL verification handshake; echo the challenge back
    Challenge(String),
    Object(SourceObject),
    /// Event type that carries no object to migrate
    Unhandled(String),
}

#[derive(Deserialize)]
struct SlackEnvelope {
    #[serde(default)]
    event: Option<SlackEvent>,
}

#[derive(Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    file: Option<SlackFile>,
}

pub fn parse_payload(body: &[u8]) -> Result<Payload, IntakeError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| IntakeError::InvalidPayload(format!("Body is not valid JSON: {}", e)))?;

    let kind = value.get("type").and_then(Value::as_str).map(str::to_string);
    match kind.as_deref() {
        Some("url_verification") => value
            .get("challenge")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(|c| Payload::Challenge(c.to_string()))
            .ok_or_else(|| IntakeError::InvalidPayload("No challenge provided".to_string())),
        Some("event_callback") => {
            let envelope: SlackEnvelope = serde_json::from_value(value)
                .map_err(|e| IntakeError::InvalidPayload(format!("Invalid event envelope: {}", e)))?;
            let event = envelope
                .event
                .ok_or_else(|| IntakeError::InvalidPayload("Event envelope has no event".to_string()))?;
            if event.kind != FILE_SHARED_EVENT {
                return Ok(Payload::Unhandled(event.kind));
            }
            let file = event.file.ok_or_else(|| {
                IntakeError::InvalidPayload("file_shared event has no file".to_string())
            })?;
            validated(ObjectNotification::from_slack_file(file))
        }
        Some(other) => Err(IntakeError::InvalidPayload(format!(
            "Unknown event type: {}",
            other
        ))),
        None => {
            let notification: ObjectNotification = serde_json::from_value(value)
                .map_err(|e| IntakeError::InvalidPayload(format!("Invalid notification: {}", e)))?;
            validated(notification)
        }
    }
}

fn validated(notification: ObjectNotification) -> Result<Payload, IntakeError> {
    notification
        .validate()
        .map_err(|e| IntakeError::InvalidPayload(e.to_string()))?;
    Ok(Payload::Object(notification.into_source_object()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

/// Unix seconds (integer, fractional or numeric string) or an RFC 3339 string
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let from_secs = |secs: f64| {
        DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)
            .ok_or_else(|| D::Error::custom(format!("timestamp {} is out of range", secs)))
    };

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Seconds(secs) => from_secs(secs as f64),
        RawTimestamp::Fractional(secs) => from_secs(secs),
        RawTimestamp::Text(text) => {
            if let Ok(secs) = text.parse::<f64>() {
                return from_secs(secs);
            }
            DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid created_at {:?}: {}", text, e)))
        }
    }
}
