//! Batch migration over the whole source listing

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use ferry_core::{
    MigrationConfig, MigrationReport, MigrationStatus, PipelineOutcome, SkipReason, SourceObject,
    StageError,
};
use ferry_db::{StateStore, StoreResult};
use ferry_source::{Page, SourceArchive};

use crate::admission::AdmissionPolicy;
use crate::pipeline::Pipeline;
use crate::retry::RetryPolicy;

/// `(page index, object id, pipeline result)`; resume sweep objects carry no page
type Settled = (Option<u64>, String, StoreResult<PipelineOutcome>);

pub struct Orchestrator {
    pipeline: Pipeline,
    store: StateStore,
    source: Arc<dyn SourceArchive>,
    admission: AdmissionPolicy,
    retry: RetryPolicy,
    call_timeout: Duration,
    checkpoint_key: String,
}

impl Orchestrator {
    pub fn new(
        pipeline: Pipeline,
        store: StateStore,
        source: Arc<dyn SourceArchive>,
        admission: AdmissionPolicy,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            pipeline,
            store,
            source,
            admission,
            retry: RetryPolicy::new(&config.retry),
            call_timeout: config.call_timeout,
            checkpoint_key: config.checkpoint_key.clone(),
        }
    }

    /// Migrate everything the source lists, plus records left unfinished by earlier runs
    ///
    /// At most `max_concurrent` pipelines run at once; submission waits for a free slot.
    /// Returns once every submitted object has settled. A listing failure that outlives
    /// the retry budget ends the run with an error after in-flight pipelines settle.
    #[tracing::instrument(skip(self, shutdown), fields(run_key = %self.checkpoint_key))]
    pub async fn run_migration(
        &self,
        batch_size: usize,
        max_concurrent: usize,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<MigrationReport> {
        anyhow::ensure!(batch_size > 0, "batch size must be positive");
        anyhow::ensure!(max_concurrent > 0, "max concurrent must be positive");

        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut in_flight: JoinSet<Settled> = JoinSet::new();
        let mut report = MigrationReport::default();

        let checkpoint = self
            .store
            .checkpoints()
            .load(&self.checkpoint_key)
            .await
            .context("Failed to load page checkpoint")?;
        let mut page_token = checkpoint.as_ref().and_then(|c| c.next_page_token.clone());
        let mut pages = PageTracker::new(
            page_token.clone(),
            checkpoint.as_ref().map_or(0, |c| c.pages_processed),
        );

        tracing::info!(
            batch_size,
            max_concurrent,
            resume_token = ?page_token,
            "Starting batch migration"
        );

        let mut resumed = HashSet::new();
        let mut cancelled = self
            .resume_sweep(
                batch_size,
                &semaphore,
                &mut in_flight,
                &mut report,
                &mut resumed,
                shutdown,
            )
            .await?;

        let mut exhausted = false;
        let mut listing_error = None;

        while !cancelled {
            let page = match self.list_page(page_token.as_deref(), batch_size, shutdown).await {
                Ok(Some(page)) => page,
                Ok(None) => {
                    cancelled = true;
                    break;
                }
                Err(e) => {
                    listing_error = Some(e);
                    break;
                }
            };

            let Page {
                objects,
                next_page_token,
            } = page;
            let index = pages.open(next_page_token.clone());
            tracing::debug!(page = index, objects = objects.len(), "Listed source page");

            for object in objects {
                self.settle_finished(&mut in_flight, &mut report, &mut pages).await;

                // Already running (or settled) under the resume sweep; counted there
                if resumed.contains(&object.object_id) {
                    continue;
                }

                if let Some(outcome) = self.pre_screen(&object).await {
                    report.record(&object.object_id, &outcome);
                    continue;
                }

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            cancelled = true;
                            break;
                        }
                    },
                };

                pages.add(index);
                let pipeline = self.pipeline.clone();
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let outcome = pipeline.run(&object, &shutdown).await;
                    (Some(index), object.object_id, outcome)
                });
            }

            if cancelled {
                break;
            }
            pages.seal(index);
            self.save_progress(&mut pages).await;

            match next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            settle(joined, &mut report, &mut pages);
            self.save_progress(&mut pages).await;
        }

        report.pages_processed = pages.completed_this_run();

        if exhausted && pages.is_drained() && !shutdown.is_cancelled() {
            self.store
                .checkpoints()
                .clear(&self.checkpoint_key)
                .await
                .context("Failed to clear page checkpoint")?;
            tracing::info!("Source listing exhausted, checkpoint cleared");
        }

        if let Some(e) = listing_error {
            return Err(e.context(format!(
                "Source listing failed after {} pages",
                report.pages_processed
            )));
        }

        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            interrupted = report.interrupted,
            pages = report.pages_processed,
            cancelled,
            "Batch migration finished"
        );
        Ok(report)
    }

    /// Pick up records a previous process left between DISCOVERED and COMPLETED
    ///
    /// Ids submitted are added to `resumed`. Returns `true` when shutdown interrupted the
    /// sweep.
    async fn resume_sweep(
        &self,
        batch_size: usize,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<Settled>,
        report: &mut MigrationReport,
        resumed: &mut HashSet<String>,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<bool> {
        let mut after: Option<String> = None;

        loop {
            let records = self
                .store
                .records()
                .list_by_status(
                    &MigrationStatus::NON_TERMINAL,
                    after.as_deref(),
                    batch_size as i64,
                )
                .await
                .context("Failed to list unfinished migration records")?;
            let Some(last) = records.last() else {
                break;
            };
            after = Some(last.object_id.clone());

            for record in records {
                while let Some(joined) = in_flight.try_join_next() {
                    settle_unpaged(joined, report);
                }

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(true),
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return Ok(true),
                    },
                };

                let object = record.source_object();
                resumed.insert(object.object_id.clone());
                let pipeline = self.pipeline.clone();
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let outcome = pipeline.run(&object, &shutdown).await;
                    (None, object.object_id, outcome)
                });
            }
        }

        if !resumed.is_empty() {
            tracing::info!(resumed = resumed.len(), "Resumed unfinished migration records");
        }
        Ok(false)
    }

    /// Decide without a pipeline whether an object needs no work
    async fn pre_screen(&self, object: &SourceObject) -> Option<PipelineOutcome> {
        let decision = self.admission.evaluate(object);
        if !decision.is_accepted() {
            tracing::debug!(object_id = %object.object_id, reason = %decision.reason(), "Ignoring object");
            return Some(PipelineOutcome::Skipped {
                reason: SkipReason::Ignored,
            });
        }

        match self.store.records().get(&object.object_id).await {
            Ok(Some(record)) if record.status.is_terminal() => Some(PipelineOutcome::Skipped {
                reason: SkipReason::AlreadyTerminal,
            }),
            Ok(_) => None,
            // The pipeline consults the store again and reports the failure
            Err(e) => {
                tracing::warn!(object_id = %object.object_id, error = %e, "Dedup lookup failed");
                None
            }
        }
    }

    /// List one page, retrying transient failures; `Ok(None)` means shutdown was requested
    async fn list_page(
        &self,
        page_token: Option<&str>,
        batch_size: usize,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<Option<Page>> {
        let mut attempt = 0u32;
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }
            attempt += 1;

            let result = match tokio::time::timeout(
                self.call_timeout,
                self.source.list_page(page_token, batch_size),
            )
            .await
            {
                Ok(Ok(page)) => return Ok(Some(page)),
                Ok(Err(e)) => StageError::classify(e),
                Err(_) => StageError::transient(anyhow::anyhow!(
                    "listing timed out after {}s",
                    self.call_timeout.as_secs_f64()
                )),
            };

            if !result.is_transient() || !self.retry.can_retry(attempt) {
                return Err(result.into_inner());
            }

            let delay = self.retry.delay_for(attempt, result.retry_after());
            tracing::warn!(
                attempt,
                backoff_ms = delay.as_millis() as u64,
                error = %result,
                "Source listing failed, retrying"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn settle_finished(
        &self,
        in_flight: &mut JoinSet<Settled>,
        report: &mut MigrationReport,
        pages: &mut PageTracker,
    ) {
        let mut settled = false;
        while let Some(joined) = in_flight.try_join_next() {
            settle(joined, report, pages);
            settled = true;
        }
        if settled {
            self.save_progress(pages).await;
        }
    }

    async fn save_progress(&self, pages: &mut PageTracker) {
        let Some((next_page_token, pages_processed)) = pages.advance() else {
            return;
        };
        if let Err(e) = self
            .store
            .checkpoints()
            .save(&self.checkpoint_key, next_page_token.as_deref(), pages_processed)
            .await
        {
            tracing::warn!(error = %e, pages_processed, "Failed to save page checkpoint");
        }
    }
}

fn settle(joined: Result<Settled, JoinError>, report: &mut MigrationReport, pages: &mut PageTracker) {
    match joined {
        Ok((page, object_id, result)) => {
            let interrupted = record_result(&object_id, result, report);
            if let Some(page) = page {
                pages.finish(page, interrupted);
            }
        }
        // Without its page the task stays outstanding, which pins the checkpoint
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task aborted");
            report.interrupted += 1;
        }
    }
}

fn settle_unpaged(joined: Result<Settled, JoinError>, report: &mut MigrationReport) {
    match joined {
        Ok((_, object_id, result)) => {
            record_result(&object_id, result, report);
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task aborted");
            report.interrupted += 1;
        }
    }
}

/// Returns `true` when the object did not settle and its page must not be checkpointed
fn record_result(
    object_id: &str,
    result: StoreResult<PipelineOutcome>,
    report: &mut MigrationReport,
) -> bool {
    match result {
        Ok(outcome) => {
            report.record(object_id, &outcome);
            outcome == PipelineOutcome::Interrupted
        }
        Err(e) => {
            tracing::error!(object_id, error = %e, "State store failure while migrating object");
            report.interrupted += 1;
            true
        }
    }
}

#[derive(Debug)]
struct PageProgress {
    /// Token of the page after this one
    next_page_token: Option<String>,
    outstanding: usize,
    sealed: bool,
    blocked: bool,
}

/// Tracks which listed pages have fully settled so the checkpoint only moves past
/// pages whose objects all reached a terminal or skipped outcome
#[derive(Debug)]
struct PageTracker {
    pages: BTreeMap<u64, PageProgress>,
    next_index: u64,
    checkpoint_token: Option<String>,
    base_processed: i64,
    completed: u64,
}

impl PageTracker {
    fn new(checkpoint_token: Option<String>, base_processed: i64) -> Self {
        Self {
            pages: BTreeMap::new(),
            next_index: 0,
            checkpoint_token,
            base_processed,
            completed: 0,
        }
    }

    fn open(&mut self, next_page_token: Option<String>) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.pages.insert(
            index,
            PageProgress {
                next_page_token,
                outstanding: 0,
                sealed: false,
                blocked: false,
            },
        );
        index
    }

    fn add(&mut self, index: u64) {
        if let Some(page) = self.pages.get_mut(&index) {
            page.outstanding += 1;
        }
    }

    fn finish(&mut self, index: u64, interrupted: bool) {
        if let Some(page) = self.pages.get_mut(&index) {
            page.outstanding = page.outstanding.saturating_sub(1);
            page.blocked |= interrupted;
        }
    }

    /// Every object of the page has been submitted or skipped
    fn seal(&mut self, index: u64) {
        if let Some(page) = self.pages.get_mut(&index) {
            page.sealed = true;
        }
    }

    /// Drop leading settled pages; returns the new checkpoint if it moved
    fn advance(&mut self) -> Option<(Option<String>, i64)> {
        let mut moved = false;
        while let Some(entry) = self.pages.first_entry() {
            let page = entry.get();
            if !page.sealed || page.blocked || page.outstanding > 0 {
                break;
            }
            let page = entry.remove();
            self.checkpoint_token = page.next_page_token;
            self.completed += 1;
            moved = true;
        }

        moved.then(|| {
            (
                self.checkpoint_token.clone(),
                self.base_processed + self.completed as i64,
            )
        })
    }

    fn is_drained(&self) -> bool {
        self.pages.is_empty()
    }

    fn completed_this_run(&self) -> u64 {
        self.completed
    }
}
