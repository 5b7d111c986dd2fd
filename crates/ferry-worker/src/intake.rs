//! Realtime admission queue and its dispatcher
//!
//! Notifications are admitted into a bounded queue and drained by a dispatcher that
//! runs each object through the shared [`Pipeline`] under its own concurrency limit,
//! independent of the batch path.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use ferry_core::{MigrationReport, PipelineOutcome, SourceObject};
use ferry_db::{StateStore, StoreError, StoreResult};

use crate::admission::AdmissionPolicy;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Registered and queued for migration
    Accepted,
    /// Already COMPLETED or FAILED
    Duplicate,
    /// Filtered out by type or size; nothing was recorded
    Ignored(String),
}

#[derive(Debug, Error)]
pub enum AdmitError {
    #[error("Intake queue is full")]
    QueueFull,

    #[error("Intake is shutting down")]
    ShuttingDown,

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct IntakeQueue {
    sender: mpsc::Sender<SourceObject>,
    store: StateStore,
    admission: AdmissionPolicy,
    shutdown: CancellationToken,
}

impl IntakeQueue {
    /// Spawn the dispatcher and return the admission handle
    ///
    /// The dispatcher stops when `shutdown` fires or every handle is dropped, waits for
    /// its in-flight pipelines and yields their tally. Objects still queued at that point
    /// keep their DISCOVERED record and are picked up by the next batch run.
    pub fn start(
        pipeline: Pipeline,
        store: StateStore,
        admission: AdmissionPolicy,
        max_concurrent: usize,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<MigrationReport>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        tracing::info!(max_concurrent, capacity, "Realtime dispatcher started");
        let handle = tokio::spawn(dispatch(pipeline, receiver, semaphore, shutdown.clone()));

        (
            Self {
                sender,
                store,
                admission,
                shutdown,
            },
            handle,
        )
    }

    /// Admit one notified object
    ///
    /// A full queue is reported before anything is written to the store.
    #[tracing::instrument(skip(self, object), fields(object_id = %object.object_id))]
    pub async fn admit(&self, object: SourceObject) -> Result<Admission, AdmitError> {
        if self.shutdown.is_cancelled() {
            return Err(AdmitError::ShuttingDown);
        }

        let decision = self.admission.evaluate(&object);
        if !decision.is_accepted() {
            let reason = decision.reason();
            tracing::debug!(%reason, "Ignoring notified object");
            return Ok(Admission::Ignored(reason));
        }

        let records = self.store.records();
        if let Some(record) = records.get(&object.object_id).await? {
            if record.status.is_terminal() {
                tracing::debug!(status = %record.status, "Duplicate notification");
                return Ok(Admission::Duplicate);
            }
        }

        let permit = self.sender.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => AdmitError::QueueFull,
            TrySendError::Closed(()) => AdmitError::ShuttingDown,
        })?;
        records.register(&object).await?;
        permit.send(object);

        tracing::info!("Object admitted for realtime migration");
        Ok(Admission::Accepted)
    }

    /// Free queue slots
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

async fn dispatch(
    pipeline: Pipeline,
    mut receiver: mpsc::Receiver<SourceObject>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
) -> MigrationReport {
    let mut in_flight: JoinSet<(String, StoreResult<PipelineOutcome>)> = JoinSet::new();
    let mut report = MigrationReport::default();

    loop {
        while let Some(joined) = in_flight.try_join_next() {
            settle(joined, &mut report);
        }

        let object = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = receiver.recv() => match received {
                Some(object) => object,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            let outcome = pipeline.run(&object, &shutdown).await;
            (object.object_id, outcome)
        });
    }

    receiver.close();
    let left_queued = receiver.len();
    if left_queued > 0 {
        tracing::info!(left_queued, "Queued objects left for the next batch run");
    }

    while let Some(joined) = in_flight.join_next().await {
        settle(joined, &mut report);
    }

    tracing::info!(
        completed = report.completed,
        failed = report.failed,
        skipped = report.skipped,
        interrupted = report.interrupted,
        "Realtime dispatcher stopped"
    );
    report
}

fn settle(
    joined: Result<(String, StoreResult<PipelineOutcome>), tokio::task::JoinError>,
    report: &mut MigrationReport,
) {
    match joined {
        Ok((object_id, Ok(outcome))) => report.record(&object_id, &outcome),
        Ok((object_id, Err(e))) => {
            tracing::error!(object_id, error = %e, "State store failure while migrating object");
            report.interrupted += 1;
        }
        Err(e) => {
            tracing::error!(error = %e, "Pipeline task aborted");
            report.interrupted += 1;
        }
    }
}
