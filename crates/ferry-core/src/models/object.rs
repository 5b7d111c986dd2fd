use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An object as observed in the source archive, from a listing page or a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceObject {
    pub object_id: String,
    /// Source channel, mapped to a destination folder
    pub container_id: String,
    pub uploader_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub mime_type: Option<String>,
    /// Short extension-like type reported by the source (`png`, `mp4`)
    pub file_type: Option<String>,
    pub size_bytes: Option<i64>,
    /// Download URL or other reference the source client understands
    pub content_ref: Option<String>,
}

impl SourceObject {
    /// Lowercased file type, falling back to the name's extension
    pub fn effective_file_type(&self) -> Option<String> {
        self.file_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .or_else(|| {
                self.name
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_lowercase())
                    .filter(|ext| !ext.is_empty())
            })
    }

    /// MIME type to hand to the annotator: the recorded one, else a guess from the file type
    pub fn effective_mime_type(&self) -> String {
        if let Some(mime) = self.mime_type.as_deref().filter(|m| !m.is_empty()) {
            return mime.to_string();
        }
        let guessed = match self.effective_file_type().as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            Some("bmp") => "image/bmp",
            Some("heic") => "image/heic",
            Some("mp4") => "video/mp4",
            Some("mov") => "video/quicktime",
            Some("avi") => "video/x-msvideo",
            Some("webm") => "video/webm",
            Some("mkv") => "video/x-matroska",
            _ => "application/octet-stream",
        };
        guessed.to_string()
    }
}
