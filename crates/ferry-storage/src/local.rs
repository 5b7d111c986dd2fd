use crate::keys::{matches_source_id, object_file_name, sanitize_segment};
use crate::traits::{Destination, DestinationError, DestinationResult, FolderRef, UploadMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const PARTIAL_SUFFIX: &str = ".partial";
const METADATA_SUFFIX: &str = ".meta.json";

/// ENOSPC
const NO_SPACE_LEFT: i32 = 28;

/// Local filesystem destination
///
/// Each object is stored as a file with a `.meta.json` sidecar holding its source
/// metadata and description.
#[derive(Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    /// Create a new LocalDestination rooted at `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> DestinationResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).await.map_err(|e| {
            DestinationError::InvalidKey(format!(
                "Failed to create destination directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalDestination { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a destination reference to a filesystem path
    ///
    /// References are relative, `/`-separated and may not climb out of the root.
    fn ref_to_path(&self, reference: &str) -> DestinationResult<PathBuf> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if reference.is_empty() || escapes {
            return Err(DestinationError::InvalidKey(format!(
                "Destination reference {:?} resolves outside the destination root",
                reference
            )));
        }
        Ok(self.root.join(relative))
    }

    fn metadata_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(METADATA_SUFFIX);
        PathBuf::from(name)
    }

    async fn write_file(path: &Path, data: &[u8]) -> DestinationResult<()> {
        let mut file = fs::File::create(path).await.map_err(map_io)?;
        file.write_all(data).await.map_err(map_io)?;
        file.sync_all().await.map_err(map_io)?;
        Ok(())
    }
}

fn map_io(err: std::io::Error) -> DestinationError {
    if err.raw_os_error() == Some(NO_SPACE_LEFT) {
        return DestinationError::QuotaExceeded(err.to_string());
    }
    match err.kind() {
        ErrorKind::PermissionDenied => DestinationError::AuthError(err.to_string()),
        _ => DestinationError::IoError(err),
    }
}

#[async_trait]
impl Destination for LocalDestination {
    async fn ensure_folder(&self, path: &[String]) -> DestinationResult<FolderRef> {
        let segments = path
            .iter()
            .map(|segment| sanitize_segment(segment))
            .collect::<DestinationResult<Vec<_>>>()?;
        if segments.is_empty() {
            return Err(DestinationError::InvalidKey(
                "Folder path must have at least one segment".to_string(),
            ));
        }

        let reference = segments.join("/");
        let dir = self.ref_to_path(&reference)?;
        fs::create_dir_all(&dir).await.map_err(map_io)?;

        tracing::debug!(folder = %reference, "Destination folder ready");
        Ok(FolderRef(reference))
    }

    async fn upload(
        &self,
        folder: &FolderRef,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> DestinationResult<String> {
        let file_name = object_file_name(&metadata.object_id, &metadata.name)?;
        let reference = format!("{}/{}", folder.as_str(), file_name);
        let path = self.ref_to_path(&reference)?;
        let size = data.len();
        let start = std::time::Instant::now();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(map_io)?;
        }

        let sidecar = serde_json::to_vec_pretty(metadata)
            .map_err(|e| DestinationError::IoError(std::io::Error::other(e)))?;
        Self::write_file(&Self::metadata_path(&path), &sidecar).await?;

        // Data becomes visible under its final name only once fully written
        let mut partial = path.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);
        Self::write_file(&partial, &data).await?;
        fs::rename(&partial, &path).await.map_err(map_io)?;

        tracing::info!(
            path = %path.display(),
            destination_ref = %reference,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local destination upload successful"
        );

        Ok(reference)
    }

    async fn find_by_source_id(
        &self,
        folder: &FolderRef,
        object_id: &str,
    ) -> DestinationResult<Option<String>> {
        let dir = self.ref_to_path(folder.as_str())?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(map_io(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(map_io)? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(PARTIAL_SUFFIX) || file_name.ends_with(METADATA_SUFFIX) {
                continue;
            }
            if matches_source_id(file_name, object_id) {
                return Ok(Some(format!("{}/{}", folder.as_str(), file_name)));
            }
        }

        Ok(None)
    }

    async fn describe(&self, destination_ref: &str, description: &str) -> DestinationResult<()> {
        let path = self.ref_to_path(destination_ref)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DestinationError::NotFound(destination_ref.to_string()));
        }

        let sidecar_path = Self::metadata_path(&path);
        let mut sidecar: serde_json::Value = match fs::read(&sidecar_path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|_| serde_json::json!({})),
            Err(e) if e.kind() == ErrorKind::NotFound => serde_json::json!({}),
            Err(e) => return Err(map_io(e)),
        };
        if let Some(map) = sidecar.as_object_mut() {
            map.insert(
                "description".to_string(),
                serde_json::Value::String(description.to_string()),
            );
        }

        let raw = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| DestinationError::IoError(std::io::Error::other(e)))?;
        Self::write_file(&sidecar_path, &raw).await?;

        tracing::debug!(destination_ref, "Description attached");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
