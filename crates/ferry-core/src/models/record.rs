use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::object::SourceObject;
use super::tag::Tag;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Discovered,
    Downloading,
    Downloaded,
    Uploading,
    Uploaded,
    Annotating,
    Completed,
    Failed,
}

impl MigrationStatus {
    pub const ALL: [MigrationStatus; 8] = [
        MigrationStatus::Discovered,
        MigrationStatus::Downloading,
        MigrationStatus::Downloaded,
        MigrationStatus::Uploading,
        MigrationStatus::Uploaded,
        MigrationStatus::Annotating,
        MigrationStatus::Completed,
        MigrationStatus::Failed,
    ];

    pub const NON_TERMINAL: [MigrationStatus; 6] = [
        MigrationStatus::Discovered,
        MigrationStatus::Downloading,
        MigrationStatus::Downloaded,
        MigrationStatus::Uploading,
        MigrationStatus::Uploaded,
        MigrationStatus::Annotating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Discovered => "discovered",
            MigrationStatus::Downloading => "downloading",
            MigrationStatus::Downloaded => "downloaded",
            MigrationStatus::Uploading => "uploading",
            MigrationStatus::Uploaded => "uploaded",
            MigrationStatus::Annotating => "annotating",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }

    /// Stage whose side effect is performed from this status
    pub fn stage(&self) -> Option<Stage> {
        match self {
            MigrationStatus::Discovered | MigrationStatus::Downloading => Some(Stage::Download),
            MigrationStatus::Downloaded | MigrationStatus::Uploading => Some(Stage::Upload),
            MigrationStatus::Uploaded | MigrationStatus::Annotating => Some(Stage::Annotate),
            MigrationStatus::Completed | MigrationStatus::Failed => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MigrationStatus::Discovered => 0,
            MigrationStatus::Downloading => 1,
            MigrationStatus::Downloaded => 2,
            MigrationStatus::Uploading => 3,
            MigrationStatus::Uploaded => 4,
            MigrationStatus::Annotating => 5,
            MigrationStatus::Completed => 6,
            MigrationStatus::Failed => 7,
        }
    }

    /// Status only moves forward along the sequence; FAILED is reachable from any
    /// non-terminal status and nothing leaves a terminal one.
    pub fn can_transition_to(&self, next: MigrationStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            MigrationStatus::Failed => true,
            _ => next.rank() >= self.rank(),
        }
    }
}

impl Display for MigrationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MigrationStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid migration status: {}", s))
    }
}

/// Side-effecting step of the per-object pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Upload,
    Annotate,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Stage::Download => write!(f, "download"),
            Stage::Upload => write!(f, "upload"),
            Stage::Annotate => write!(f, "annotate"),
        }
    }
}

/// Durable migration state of one source object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub object_id: String,
    pub container_id: String,
    pub uploader_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub content_ref: Option<String>,
    pub status: MigrationStatus,
    pub download_attempts: i32,
    pub upload_attempts: i32,
    pub annotate_attempts: i32,
    /// Written once on successful upload, never cleared
    pub destination_ref: Option<String>,
    pub tags: Option<Vec<Tag>>,
    pub last_error: Option<String>,
    pub claim_token: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// Fresh DISCOVERED record for an object seen for the first time
    pub fn discovered(object: &SourceObject, now: DateTime<Utc>) -> Self {
        Self {
            object_id: object.object_id.clone(),
            container_id: object.container_id.clone(),
            uploader_id: object.uploader_id.clone(),
            created_at: object.created_at,
            name: object.name.clone(),
            mime_type: object.mime_type.clone(),
            file_type: object.file_type.clone(),
            size_bytes: object.size_bytes,
            content_ref: object.content_ref.clone(),
            status: MigrationStatus::Discovered,
            download_attempts: 0,
            upload_attempts: 0,
            annotate_attempts: 0,
            destination_ref: None,
            tags: None,
            last_error: None,
            claim_token: None,
            lease_expires_at: None,
            discovered_at: now,
            updated_at: now,
        }
    }

    pub fn source_object(&self) -> SourceObject {
        SourceObject {
            object_id: self.object_id.clone(),
            container_id: self.container_id.clone(),
            uploader_id: self.uploader_id.clone(),
            created_at: self.created_at,
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            file_type: self.file_type.clone(),
            size_bytes: self.size_bytes,
            content_ref: self.content_ref.clone(),
        }
    }

    pub fn attempts(&self, stage: Stage) -> i32 {
        match stage {
            Stage::Download => self.download_attempts,
            Stage::Upload => self.upload_attempts,
            Stage::Annotate => self.annotate_attempts,
        }
    }

    pub fn record_attempt(&mut self, stage: Stage) -> i32 {
        let counter = match stage {
            Stage::Download => &mut self.download_attempts,
            Stage::Upload => &mut self.upload_attempts,
            Stage::Annotate => &mut self.annotate_attempts,
        };
        *counter += 1;
        *counter
    }

    pub fn transition(&mut self, next: MigrationStatus) {
        debug_assert!(
            self.status == next || self.status.can_transition_to(next),
            "illegal transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }

    /// Bump `updated_at` so it strictly increases even if the wall clock stalls
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + ChronoDuration::microseconds(1);
        self.updated_at = if now > floor { now } else { floor };
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for MigrationRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let status: String = row.try_get("status")?;
        let status = status.parse::<MigrationStatus>().map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: e.into(),
        })?;

        let tags: Option<String> = row.try_get("tags")?;
        let tags = tags
            .map(|raw| serde_json::from_str::<Vec<Tag>>(&raw))
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "tags".to_string(),
                source: Box::new(e),
            })?;

        let lease_expires_at: Option<i64> = row.try_get("lease_expires_at")?;

        Ok(MigrationRecord {
            object_id: row.try_get("object_id")?,
            container_id: row.try_get("container_id")?,
            uploader_id: row.try_get("uploader_id")?,
            created_at: row.try_get("created_at")?,
            name: row.try_get("name")?,
            mime_type: row.try_get("mime_type")?,
            file_type: row.try_get("file_type")?,
            size_bytes: row.try_get("size_bytes")?,
            content_ref: row.try_get("content_ref")?,
            status,
            download_attempts: row.try_get("download_attempts")?,
            upload_attempts: row.try_get("upload_attempts")?,
            annotate_attempts: row.try_get("annotate_attempts")?,
            destination_ref: row.try_get("destination_ref")?,
            tags,
            last_error: row.try_get("last_error")?,
            claim_token: row.try_get("claim_token")?,
            lease_expires_at: lease_expires_at.and_then(DateTime::from_timestamp_millis),
            discovered_at: row.try_get("discovered_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
