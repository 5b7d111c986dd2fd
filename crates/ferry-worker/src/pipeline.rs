//! Per-object migration pipeline
//!
//! Drives one object through download, upload and annotate under an exclusive claim on
//! its migration record. Every stage attempt is counted and persisted before the call is
//! made, so a restarted process resumes with the remaining budget instead of a fresh one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ferry_core::models::{dedup_tags, describe};
use ferry_core::{
    Config, MigrationRecord, MigrationStatus, PipelineOutcome, SkipReason, SourceObject, Stage,
    StageError, Tag,
};
use ferry_db::{StateStore, StoreError, StoreResult};
use ferry_plugins::Annotator;
use ferry_source::SourceArchive;
use ferry_storage::{Destination, UploadMetadata};

use crate::retry::RetryPolicy;
use crate::staging::{StagedObject, Staging};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    /// Upper bound for any single collaborator call
    pub call_timeout: Duration,
    pub claim_lease: Duration,
    pub root_folder: String,
    pub folder_prefix: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::new(&config.migration.retry),
            call_timeout: config.migration.call_timeout,
            claim_lease: config.migration.claim_lease,
            root_folder: config.destination.root_folder.clone(),
            folder_prefix: config.destination.folder_prefix.clone(),
        }
    }
}

/// Shared by the batch orchestrator and the realtime dispatcher
#[derive(Clone)]
pub struct Pipeline {
    store: StateStore,
    source: Arc<dyn SourceArchive>,
    destination: Arc<dyn Destination>,
    annotator: Arc<dyn Annotator>,
    staging: Staging,
    settings: Arc<PipelineSettings>,
}

/// Result of running one stage through the retry loop
enum StageStep<T> {
    Done(T),
    Failed(String),
    Interrupted,
}

/// State held while this process owns an object's claim
struct ClaimedRun {
    record: MigrationRecord,
    token: String,
    staged: Option<StagedObject>,
    buffer: Option<Bytes>,
}

impl Pipeline {
    pub fn new(
        store: StateStore,
        source: Arc<dyn SourceArchive>,
        destination: Arc<dyn Destination>,
        annotator: Arc<dyn Annotator>,
        staging: Staging,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            source,
            destination,
            annotator,
            staging,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Migrate one object, resuming from whatever stage its record is at
    ///
    /// Only store failures surface as `Err`; collaborator failures end in
    /// [`PipelineOutcome::Failed`] with the record marked FAILED.
    #[tracing::instrument(skip(self, object, shutdown), fields(object_id = %object.object_id))]
    pub async fn run(
        &self,
        object: &SourceObject,
        shutdown: &CancellationToken,
    ) -> StoreResult<PipelineOutcome> {
        let records = self.store.records();
        records.register(object).await?;

        let token = Uuid::new_v4().to_string();
        let Some(record) = records
            .claim(&object.object_id, &token, self.settings.claim_lease)
            .await?
        else {
            let reason = match records.get(&object.object_id).await? {
                Some(record) if record.status.is_terminal() => SkipReason::AlreadyTerminal,
                _ => SkipReason::ClaimedElsewhere,
            };
            tracing::debug!(?reason, "Object not claimed, skipping");
            return Ok(PipelineOutcome::Skipped { reason });
        };

        tracing::debug!(status = %record.status, "Claimed migration record");
        let mut run = ClaimedRun {
            record,
            token,
            staged: None,
            buffer: None,
        };

        let result = self.drive(&mut run, shutdown).await;
        // Temp file goes away before the claim is given up
        run.staged = None;

        match result {
            Ok(PipelineOutcome::Interrupted) => {
                records.release(&run.record.object_id, &run.token).await?;
                tracing::info!(status = %run.record.status, "Pipeline interrupted, claim released");
                Ok(PipelineOutcome::Interrupted)
            }
            Ok(outcome) => Ok(outcome),
            Err(StoreError::ClaimLost { .. }) => {
                tracing::warn!("Claim lost to another worker, abandoning object");
                Ok(PipelineOutcome::Skipped {
                    reason: SkipReason::ClaimLost,
                })
            }
            Err(e) => {
                if let Err(release_err) = records.release(&run.record.object_id, &run.token).await
                {
                    tracing::warn!(error = %release_err, "Failed to release claim after store error");
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        run: &mut ClaimedRun,
        shutdown: &CancellationToken,
    ) -> StoreResult<PipelineOutcome> {
        let object = run.record.source_object();

        if matches!(
            run.record.status,
            MigrationStatus::Discovered | MigrationStatus::Downloading
        ) {
            run.record.transition(MigrationStatus::Downloading);
            let source = &self.source;
            let staging = &self.staging;
            let object = &object;
            let step = self
                .attempt(
                    &mut run.record,
                    &run.token,
                    Stage::Download,
                    shutdown,
                    move || async move {
                        let download = source
                            .download(object)
                            .await
                            .map_err(StageError::classify)?;
                        let staged = staging.stage(&object.object_id, &download.bytes).await?;
                        Ok::<_, StageError>(staged)
                    },
                )
                .await?;

            match step {
                StageStep::Done(staged) => {
                    tracing::info!(size_bytes = staged.size(), "Download complete");
                    run.staged = Some(staged);
                    run.record.transition(MigrationStatus::Downloaded);
                    self.persist(&mut run.record, &run.token).await?;
                }
                StageStep::Failed(error) => return self.fail(run, Stage::Download, error).await,
                StageStep::Interrupted => return Ok(PipelineOutcome::Interrupted),
            }
        }

        if matches!(
            run.record.status,
            MigrationStatus::Downloaded | MigrationStatus::Uploading
        ) {
            run.record.transition(MigrationStatus::Uploading);
            let folder_path = vec![
                self.settings.root_folder.clone(),
                format!("{}{}", self.settings.folder_prefix, object.container_id),
            ];
            let metadata = upload_metadata(&object);
            let source = &self.source;
            let destination = &self.destination;
            let staged = &run.staged;
            let object = &object;
            let folder_path = &folder_path;
            let metadata = &metadata;
            let step = self
                .attempt(
                    &mut run.record,
                    &run.token,
                    Stage::Upload,
                    shutdown,
                    move || async move {
                        let folder = destination
                            .ensure_folder(folder_path)
                            .await
                            .map_err(StageError::classify)?;

                        // A crash between the remote upload and the store write leaves the
                        // object at the destination already
                        if let Some(existing) = destination
                            .find_by_source_id(&folder, &object.object_id)
                            .await
                            .map_err(StageError::classify)?
                        {
                            tracing::info!(destination_ref = %existing, "Adopting existing destination object");
                            return Ok((existing, None));
                        }

                        let data = match staged {
                            Some(staged) => staged.read().await?,
                            None => {
                                tracing::debug!("No staged bytes, fetching from source again");
                                source
                                    .download(object)
                                    .await
                                    .map_err(StageError::classify)?
                                    .bytes
                            }
                        };
                        let reference = destination
                            .upload(&folder, data.clone(), metadata)
                            .await
                            .map_err(StageError::classify)?;
                        Ok::<_, StageError>((reference, Some(data)))
                    },
                )
                .await?;

            match step {
                StageStep::Done((reference, data)) => {
                    tracing::info!(
                        destination_ref = %reference,
                        backend = self.destination.backend_name(),
                        "Upload complete"
                    );
                    if run.record.destination_ref.is_none() {
                        run.record.destination_ref = Some(reference);
                    }
                    run.staged = None;
                    run.buffer = data;
                    run.record.transition(MigrationStatus::Uploaded);
                    self.persist(&mut run.record, &run.token).await?;
                }
                StageStep::Failed(error) => return self.fail(run, Stage::Upload, error).await,
                StageStep::Interrupted => return Ok(PipelineOutcome::Interrupted),
            }
        }

        if matches!(
            run.record.status,
            MigrationStatus::Uploaded | MigrationStatus::Annotating
        ) {
            run.record.transition(MigrationStatus::Annotating);
            let mime_type = object.effective_mime_type();
            let source = &self.source;
            let annotator = &self.annotator;
            let buffer = &run.buffer;
            let object = &object;
            let mime_type = mime_type.as_str();
            let step = self
                .attempt(
                    &mut run.record,
                    &run.token,
                    Stage::Annotate,
                    shutdown,
                    move || async move {
                        let data = match buffer {
                            Some(data) => data.clone(),
                            None => {
                                source
                                    .download(object)
                                    .await
                                    .map_err(StageError::classify)?
                                    .bytes
                            }
                        };
                        annotator
                            .analyze(data, mime_type)
                            .await
                            .map_err(StageError::classify)
                    },
                )
                .await?;

            let tags = match step {
                StageStep::Done(tags) => tags,
                StageStep::Failed(error) => {
                    tracing::warn!(
                        annotator = self.annotator.name(),
                        error = %error,
                        "Annotation failed, completing without tags"
                    );
                    Vec::new()
                }
                StageStep::Interrupted => return Ok(PipelineOutcome::Interrupted),
            };
            run.buffer = None;

            return self.finalize(run, dedup_tags(tags)).await;
        }

        // Claims are never granted on terminal records
        Ok(PipelineOutcome::Skipped {
            reason: SkipReason::AlreadyTerminal,
        })
    }

    /// Run `op` until it succeeds, fails permanently or spends the stage's attempt budget
    async fn attempt<T, F, Fut>(
        &self,
        record: &mut MigrationRecord,
        token: &str,
        stage: Stage,
        shutdown: &CancellationToken,
        mut op: F,
    ) -> StoreResult<StageStep<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let policy = &self.settings.retry;
        loop {
            if shutdown.is_cancelled() {
                return Ok(StageStep::Interrupted);
            }

            let made = record.attempts(stage) as u32;
            if !policy.can_retry(made) {
                return Ok(StageStep::Failed(format!(
                    "{} retry budget exhausted after {} attempts",
                    stage, made
                )));
            }

            let attempt = record.record_attempt(stage) as u32;
            self.persist(record, token).await?;

            let result = match tokio::time::timeout(self.settings.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StageError::transient(anyhow::anyhow!(
                    "{} timed out after {}s",
                    stage,
                    self.settings.call_timeout.as_secs_f64()
                ))),
            };

            let error = match result {
                Ok(value) => return Ok(StageStep::Done(value)),
                Err(error) => error,
            };

            if !error.is_transient() {
                tracing::warn!(
                    stage = %stage,
                    attempt,
                    class = %error.class(),
                    error = %error,
                    "Stage failed permanently"
                );
                return Ok(StageStep::Failed(format!("{} failed: {}", stage, error)));
            }

            if !policy.can_retry(attempt) {
                tracing::warn!(stage = %stage, attempt, error = %error, "Stage retry budget exhausted");
                return Ok(StageStep::Failed(format!(
                    "{} failed after {} attempts: {}",
                    stage, attempt, error
                )));
            }

            let delay = policy.delay_for(attempt, error.retry_after());
            tracing::warn!(
                stage = %stage,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Transient stage failure, retrying"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(StageStep::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn finalize(&self, run: &mut ClaimedRun, tags: Vec<Tag>) -> StoreResult<PipelineOutcome> {
        if let Some(reference) = run.record.destination_ref.as_deref() {
            let file_type = run.record.source_object().effective_file_type();
            let description = describe(&tags, file_type.as_deref());
            match tokio::time::timeout(
                self.settings.call_timeout,
                self.destination.describe(reference, &description),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to attach description to destination object")
                }
                Err(_) => tracing::warn!("Timed out attaching description to destination object"),
            }
        }

        let count = tags.len();
        run.record.tags = Some(tags);
        run.record.last_error = None;
        run.record.transition(MigrationStatus::Completed);
        self.persist(&mut run.record, &run.token).await?;

        tracing::info!(tags = count, "Object migrated");
        Ok(PipelineOutcome::Completed { tags: count })
    }

    async fn fail(
        &self,
        run: &mut ClaimedRun,
        stage: Stage,
        error: String,
    ) -> StoreResult<PipelineOutcome> {
        run.staged = None;
        run.buffer = None;
        run.record.last_error = Some(error.clone());
        run.record.transition(MigrationStatus::Failed);
        self.persist(&mut run.record, &run.token).await?;

        tracing::error!(stage = %stage, error = %error, "Object migration failed");
        Ok(PipelineOutcome::Failed { error })
    }

    async fn persist(&self, record: &mut MigrationRecord, token: &str) -> StoreResult<()> {
        record.touch(Utc::now());
        self.store
            .records()
            .update(record, token, self.settings.claim_lease)
            .await
    }
}

fn upload_metadata(object: &SourceObject) -> UploadMetadata {
    let mut properties = BTreeMap::new();
    properties.insert("slack_channel".to_string(), object.container_id.clone());
    properties.insert("slack_user".to_string(), object.uploader_id.clone());
    properties.insert("slack_created_at".to_string(), object.created_at.to_rfc3339());
    properties.insert("original_name".to_string(), object.name.clone());

    UploadMetadata {
        object_id: object.object_id.clone(),
        name: object.name.clone(),
        mime_type: Some(object.effective_mime_type()),
        properties,
        description: None,
    }
}
