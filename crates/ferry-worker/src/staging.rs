//! Scratch files holding downloaded bytes between the download and upload stages

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::TempPath;
use tokio::fs;

const STAGING_PREFIX: &str = "ferry-";

/// Directory where downloaded objects are staged
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

/// A staged object on disk; the file is removed when this value is dropped
#[derive(Debug)]
pub struct StagedObject {
    path: TempPath,
    size: u64,
}

impl StagedObject {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub async fn read(&self) -> std::io::Result<Bytes> {
        Ok(Bytes::from(fs::read(&self.path).await?))
    }
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` to a fresh scratch file
    pub async fn stage(&self, object_id: &str, data: &[u8]) -> std::io::Result<StagedObject> {
        fs::create_dir_all(&self.dir).await?;

        let prefix = format!("{}{}-", STAGING_PREFIX, sanitize(object_id));
        let path = tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&self.dir)?
            .into_temp_path();
        fs::write(&path, data).await?;

        tracing::debug!(
            object_id,
            path = %path.display(),
            size_bytes = data.len(),
            "Staged downloaded object"
        );
        Ok(StagedObject {
            path,
            size: data.len() as u64,
        })
    }

    /// Remove staging files left behind by a killed process
    ///
    /// Only call this before any pipeline of this process has started.
    pub async fn purge_stale(&self) -> std::io::Result<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_staged = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGING_PREFIX));
            if is_staged && entry.file_type().await?.is_file() {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, dir = %self.dir.display(), "Purged stale staging files");
        }
        Ok(removed)
    }
}

fn sanitize(object_id: &str) -> String {
    object_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(64)
        .collect()
}
