//! Per-object pipeline tests against in-memory collaborators.
//!
//! Run with: `cargo test -p ferry-worker --test pipeline_test`

mod helpers;

use std::time::Duration;

use ferry_core::{MigrationStatus, PipelineOutcome, SkipReason, TagKind};
use ferry_source::SourceError;
use ferry_storage::DestinationError;
use tokio_util::sync::CancellationToken;

use helpers::{object, settings, AnnotatorMode, FakeSource, TestEnv, MAX_ATTEMPTS};

#[tokio::test]
async fn test_object_is_migrated_end_to_end() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    let shutdown = CancellationToken::new();

    let outcome = env.pipeline.run(&object("F1", "C1"), &shutdown).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed { tags: 2 });

    let record = env.record("F1").await;
    assert_eq!(record.status, MigrationStatus::Completed);
    assert_eq!(record.download_attempts, 1);
    assert_eq!(record.upload_attempts, 1);
    assert_eq!(record.annotate_attempts, 1);
    assert!(record.claim_token.is_none());
    assert!(record.last_error.is_none());

    let reference = record.destination_ref.expect("destination ref");
    assert_eq!(reference, "Slack Archive/Slack - C1/F1__f1.png");

    let tags = record.tags.expect("tags");
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].kind, TagKind::Label);

    let description = env.destination.description_of(&reference).unwrap();
    assert!(description.contains("Contains: Cat"));
    assert!(description.contains("Text: hello world"));

    assert_eq!(helpers::file_count(env.staging.dir()), 0);
}

#[tokio::test]
async fn test_completed_object_is_not_migrated_twice() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    let shutdown = CancellationToken::new();
    let object = object("F1", "C1");

    env.pipeline.run(&object, &shutdown).await.unwrap();
    let first = env.record("F1").await;

    let outcome = env.pipeline.run(&object, &shutdown).await.unwrap();
    assert_eq!(
        outcome,
        PipelineOutcome::Skipped {
            reason: SkipReason::AlreadyTerminal
        }
    );

    let second = env.record("F1").await;
    assert_eq!(second.updated_at, first.updated_at);
    assert_eq!(env.source.downloads_of("F1"), 1);
    assert_eq!(env.destination.uploads_of("F1"), 1);
}

#[tokio::test]
async fn test_concurrent_runs_upload_once() {
    let env = TestEnv::new(
        FakeSource::default().with_delay(Duration::from_millis(20)),
        AnnotatorMode::Tags,
    )
    .await;
    let shutdown = CancellationToken::new();
    let object = object("F1", "C1");

    let (a, b) = tokio::join!(
        env.pipeline.run(&object, &shutdown),
        env.pipeline.run(&object, &shutdown)
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, PipelineOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, PipelineOutcome::Skipped { .. })));
    assert_eq!(env.destination.uploads_of("F1"), 1);
    assert_eq!(env.source.downloads_of("F1"), 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    env.source.fail_downloads(
        "F1",
        vec![
            SourceError::Transport("reset".to_string()),
            SourceError::RateLimited {
                retry_after: Some(Duration::from_millis(5)),
            },
        ],
    );

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed { .. }));

    let record = env.record("F1").await;
    assert_eq!(record.download_attempts, 3);
    assert_eq!(env.source.downloads_of("F1"), 3);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_object() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    env.source.fail_downloads(
        "F1",
        (0..5)
            .map(|_| SourceError::Transport("unreachable".to_string()))
            .collect(),
    );
    let object = object("F1", "C1");
    let shutdown = CancellationToken::new();

    let outcome = env.pipeline.run(&object, &shutdown).await.unwrap();
    assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

    let record = env.record("F1").await;
    assert_eq!(record.status, MigrationStatus::Failed);
    assert_eq!(record.download_attempts, MAX_ATTEMPTS as i32);
    assert!(record.last_error.unwrap().contains("unreachable"));
    assert!(record.claim_token.is_none());
    assert_eq!(env.source.downloads_of("F1"), MAX_ATTEMPTS as usize);

    // Terminal: nothing else is tried
    let outcome = env.pipeline.run(&object, &shutdown).await.unwrap();
    assert_eq!(
        outcome,
        PipelineOutcome::Skipped {
            reason: SkipReason::AlreadyTerminal
        }
    );
    assert_eq!(env.source.downloads_of("F1"), MAX_ATTEMPTS as usize);
    assert_eq!(env.destination.total_uploads(), 0);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    env.source
        .fail_downloads("F1", vec![SourceError::NotFound("F1".to_string())]);

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

    let record = env.record("F1").await;
    assert_eq!(record.download_attempts, 1);
    assert_eq!(record.upload_attempts, 0);
    assert!(record.destination_ref.is_none());
}

#[tokio::test]
async fn test_upload_failure_removes_staged_file() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    env.destination
        .fail_uploads(vec![DestinationError::QuotaExceeded("drive full".to_string())]);

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

    let record = env.record("F1").await;
    assert_eq!(record.status, MigrationStatus::Failed);
    assert_eq!(record.upload_attempts, 1);
    assert!(record.last_error.unwrap().contains("drive full"));
    assert_eq!(helpers::file_count(env.staging.dir()), 0);
}

#[tokio::test]
async fn test_unsupported_annotation_still_completes() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Unsupported).await;

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed { tags: 0 });

    let record = env.record("F1").await;
    assert_eq!(record.status, MigrationStatus::Completed);
    assert_eq!(record.tags, Some(Vec::new()));
    assert_eq!(record.annotate_attempts, 1);
    assert!(record.destination_ref.is_some());
}

#[tokio::test]
async fn test_unavailable_annotator_gives_up_after_budget() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Unavailable).await;

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed { tags: 0 });

    let record = env.record("F1").await;
    assert_eq!(record.annotate_attempts, MAX_ATTEMPTS as i32);
    assert_eq!(env.annotator.calls(), MAX_ATTEMPTS as usize);

    let description = env
        .destination
        .description_of(record.destination_ref.as_deref().unwrap())
        .unwrap();
    assert_eq!(description, "Uploaded png file");
}

#[tokio::test]
async fn test_existing_destination_object_is_adopted() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    let seeded = env.destination.seed("Slack Archive/Slack - C1", "F1");

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Completed { .. }));

    let record = env.record("F1").await;
    assert_eq!(record.destination_ref.as_deref(), Some(seeded.as_str()));
    assert_eq!(env.destination.uploads_of("F1"), 0);
}

#[tokio::test]
async fn test_slow_calls_time_out_as_transient() {
    let env = TestEnv::with_settings(
        FakeSource::default().with_delay(Duration::from_millis(200)),
        AnnotatorMode::Tags,
        settings(2, Duration::from_millis(20)),
    )
    .await;

    let outcome = env
        .pipeline
        .run(&object("F1", "C1"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, PipelineOutcome::Failed { .. }));

    let record = env.record("F1").await;
    assert_eq!(record.download_attempts, 2);
    assert!(record.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_resume_after_upload_refetches_for_annotation() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    let object = object("F1", "C1");
    let records = env.store.records();

    // State left by a process that died right after the upload was recorded
    records.register(&object).await.unwrap();
    let mut record = records
        .claim("F1", "crashed", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    record.download_attempts = 1;
    record.upload_attempts = 1;
    record.destination_ref = Some("Slack Archive/Slack - C1/F1__f1.png".to_string());
    record.transition(MigrationStatus::Uploaded);
    record.touch(chrono::Utc::now());
    records
        .update(&record, "crashed", Duration::from_secs(60))
        .await
        .unwrap();
    records.release("F1", "crashed").await.unwrap();

    let outcome = env
        .pipeline
        .run(&object, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed { tags: 2 });

    let record = env.record("F1").await;
    assert_eq!(record.upload_attempts, 1);
    assert_eq!(record.annotate_attempts, 1);
    assert_eq!(env.destination.total_uploads(), 0);
    assert_eq!(env.source.downloads_of("F1"), 1);
}

#[tokio::test]
async fn test_live_claim_elsewhere_is_respected() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    let object = object("F1", "C1");
    env.store.records().register(&object).await.unwrap();
    env.store
        .records()
        .claim("F1", "other-process", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let outcome = env
        .pipeline
        .run(&object, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PipelineOutcome::Skipped {
            reason: SkipReason::ClaimedElsewhere
        }
    );
    assert_eq!(env.source.total_downloads(), 0);
}

#[tokio::test]
async fn test_shutdown_releases_claim() {
    let env = TestEnv::new(FakeSource::default(), AnnotatorMode::Tags).await;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let outcome = env.pipeline.run(&object("F1", "C1"), &shutdown).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Interrupted);

    let record = env.record("F1").await;
    assert_eq!(record.status, MigrationStatus::Downloading);
    assert_eq!(record.download_attempts, 0);
    assert!(record.claim_token.is_none());
    assert_eq!(env.source.total_downloads(), 0);
}
