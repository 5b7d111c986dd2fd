//! File type and size filter applied before an object enters the pipeline

use ferry_core::{MigrationConfig, SourceObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accept,
    UnsupportedType(Option<String>),
    TooLarge { size_bytes: i64, limit: u64 },
}

impl AdmissionDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionDecision::Accept)
    }

    pub fn reason(&self) -> String {
        match self {
            AdmissionDecision::Accept => "accepted".to_string(),
            AdmissionDecision::UnsupportedType(Some(file_type)) => {
                format!("file type '{}' is not migrated", file_type)
            }
            AdmissionDecision::UnsupportedType(None) => "file type is unknown".to_string(),
            AdmissionDecision::TooLarge { size_bytes, limit } => {
                format!("{} bytes exceeds the {} byte limit", size_bytes, limit)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    allowed_file_types: Vec<String>,
    max_file_size_bytes: u64,
}

impl AdmissionPolicy {
    pub fn new(allowed_file_types: Vec<String>, max_file_size_bytes: u64) -> Self {
        Self {
            allowed_file_types: allowed_file_types
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            max_file_size_bytes,
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(
            config.allowed_file_types.clone(),
            config.max_file_size_bytes,
        )
    }

    /// Accept everything
    pub fn permissive() -> Self {
        Self::new(Vec::new(), u64::MAX)
    }

    /// An empty allow-list accepts every type. Unknown sizes are accepted.
    pub fn evaluate(&self, object: &SourceObject) -> AdmissionDecision {
        if !self.allowed_file_types.is_empty() {
            let file_type = object.effective_file_type();
            let allowed = file_type
                .as_deref()
                .is_some_and(|t| self.allowed_file_types.iter().any(|a| a == t));
            if !allowed {
                return AdmissionDecision::UnsupportedType(file_type);
            }
        }

        if let Some(size_bytes) = object.size_bytes {
            if size_bytes > 0 && size_bytes as u64 > self.max_file_size_bytes {
                return AdmissionDecision::TooLarge {
                    size_bytes,
                    limit: self.max_file_size_bytes,
                };
            }
        }

        AdmissionDecision::Accept
    }
}
