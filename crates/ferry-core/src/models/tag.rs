use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Label,
    Object,
    Text,
    Face,
    Landmark,
    Logo,
    WebEntity,
    /// Label covering a whole video segment
    VideoLabel,
    ShotLabel,
    VideoText,
}

/// A derived label attached to a migrated object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type")]
    pub kind: TagKind,
    pub description: String,
    pub confidence: f32,
    /// Annotator that produced the tag
    pub source: String,
}

impl Tag {
    pub fn new(
        kind: TagKind,
        description: impl Into<String>,
        confidence: f32,
        source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            confidence,
            source: source.into(),
        }
    }
}

/// Drop repeated (kind, description) pairs, keeping the first occurrence
pub fn dedup_tags(tags: Vec<Tag>) -> Vec<Tag> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert((tag.kind, tag.description.to_lowercase())))
        .collect()
}

const DESCRIPTION_LABEL_CONFIDENCE: f32 = 0.7;
const DESCRIPTION_MAX_LABELS: usize = 5;
const DESCRIPTION_TEXT_CHARS: usize = 100;

/// Human readable description pushed to the destination object on finalize
///
/// Built from high-confidence labels, the first detected text and special features.
pub fn describe(tags: &[Tag], file_type: Option<&str>) -> String {
    let mut parts = Vec::new();

    let labels: Vec<&str> = tags
        .iter()
        .filter(|t| matches!(t.kind, TagKind::Label | TagKind::VideoLabel))
        .filter(|t| t.confidence > DESCRIPTION_LABEL_CONFIDENCE)
        .take(DESCRIPTION_MAX_LABELS)
        .map(|t| t.description.as_str())
        .collect();
    if !labels.is_empty() {
        parts.push(format!("Contains: {}", labels.join(", ")));
    }

    if let Some(text) = tags
        .iter()
        .find(|t| matches!(t.kind, TagKind::Text | TagKind::VideoText))
    {
        let snippet: String = text.description.chars().take(DESCRIPTION_TEXT_CHARS).collect();
        if text.description.chars().count() > DESCRIPTION_TEXT_CHARS {
            parts.push(format!("Text: {}...", snippet));
        } else {
            parts.push(format!("Text: {}", snippet));
        }
    }

    let mut features = Vec::new();
    for (kind, name) in [
        (TagKind::Face, "face"),
        (TagKind::Landmark, "landmark"),
        (TagKind::Logo, "logo"),
    ] {
        if tags.iter().any(|t| t.kind == kind) {
            features.push(name);
        }
    }
    if !features.is_empty() {
        parts.push(format!("Features: {}", features.join(", ")));
    }

    if parts.is_empty() {
        format!("Uploaded {} file", file_type.unwrap_or("unknown"))
    } else {
        parts.join(" | ")
    }
}
