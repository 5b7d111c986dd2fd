use serde::Serialize;

use super::record::MigrationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Record already COMPLETED or FAILED
    AlreadyTerminal,
    /// Another pipeline holds a live claim on the object
    ClaimedElsewhere,
    /// Our claim expired and was taken over mid-run
    ClaimLost,
    /// Type not in the allow-list or larger than the size limit
    Ignored,
}

/// Result of one pipeline invocation for one object
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed { tags: usize },
    Failed { error: String },
    Skipped { reason: SkipReason },
    /// Stopped by shutdown; the record stays non-terminal and resumable
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedObject {
    pub object_id: String,
    pub last_error: Option<String>,
}

/// Summary returned by a batch run or the realtime dispatcher
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub interrupted: u64,
    pub pages_processed: u64,
    pub failures: Vec<FailedObject>,
}

impl MigrationReport {
    pub fn record(&mut self, object_id: &str, outcome: &PipelineOutcome) {
        match outcome {
            PipelineOutcome::Completed { .. } => self.completed += 1,
            PipelineOutcome::Failed { error } => {
                self.failed += 1;
                self.failures.push(FailedObject {
                    object_id: object_id.to_string(),
                    last_error: Some(error.clone()),
                });
            }
            PipelineOutcome::Skipped { .. } => self.skipped += 1,
            PipelineOutcome::Interrupted => self.interrupted += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.completed + self.failed + self.skipped + self.interrupted
    }
}

/// Record counts per status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub discovered: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StoreStats {
    pub fn add(&mut self, status: MigrationStatus, count: u64) {
        self.total += count;
        match status {
            MigrationStatus::Discovered => self.discovered += count,
            MigrationStatus::Completed => self.completed += count,
            MigrationStatus::Failed => self.failed += count,
            _ => self.in_progress += count,
        }
    }
}
