//! Shared naming rules for destination folders and files.
//!
//! Folder: `{root_folder}/{folder_prefix}{container_id}`. File: `{object_id}__{name}`.

use crate::traits::{DestinationError, DestinationResult};

/// Separator between the source object id and the original file name
pub const SOURCE_ID_SEPARATOR: &str = "__";

const MAX_SEGMENT_LEN: usize = 200;

/// Make a single path segment safe for any backend
///
/// Path separators and control characters are replaced, surrounding whitespace and dots
/// are trimmed. Segments that end up empty (or are `.`/`..`) are rejected.
pub fn sanitize_segment(segment: &str) -> DestinationResult<String> {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();

    if cleaned.is_empty() {
        return Err(DestinationError::InvalidKey(format!(
            "path segment {:?} is empty after sanitizing",
            segment
        )));
    }

    Ok(cleaned.chars().take(MAX_SEGMENT_LEN).collect())
}

/// File name for an uploaded object
pub fn object_file_name(object_id: &str, name: &str) -> DestinationResult<String> {
    let object_id = sanitize_segment(object_id)?;
    let name = sanitize_segment(name).unwrap_or_else(|_| "file".to_string());
    Ok(format!("{}{}{}", object_id, SOURCE_ID_SEPARATOR, name))
}

/// Whether a stored file name belongs to `object_id`
pub fn matches_source_id(file_name: &str, object_id: &str) -> bool {
    file_name
        .strip_prefix(object_id)
        .is_some_and(|rest| rest.starts_with(SOURCE_ID_SEPARATOR))
}
