//! Test helpers: intake router over a temp-dir store, local destination and a fake source.
//!
//! Run from workspace root: `cargo test -p ferry-api`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ferry_api::{router, AppState};
use ferry_core::{MigrationReport, MigrationStatus, RetryConfig, SourceObject};
use ferry_db::StateStore;
use ferry_infra::compute_signature;
use ferry_plugins::NoopAnnotator;
use ferry_source::{Download, Page, SourceArchive, SourceMetadata, SourceResult};
use ferry_storage::LocalDestination;
use ferry_worker::{AdmissionPolicy, IntakeQueue, Pipeline, PipelineSettings, RetryPolicy, Staging};

pub const SECRET: &str = "test-webhook-secret-0123456789";
pub const ENDPOINT: &str = "/slack/webhook";

/// Source that serves fixed bytes; downloads optionally wait for [`FakeSource::open_gate`]
#[derive(Default)]
pub struct FakeSource {
    gate: Option<Arc<Semaphore>>,
}

impl FakeSource {
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }
}

#[async_trait]
impl SourceArchive for FakeSource {
    async fn list_page(&self, _page_token: Option<&str>, _page_size: usize) -> SourceResult<Page> {
        Ok(Page {
            objects: Vec::new(),
            next_page_token: None,
        })
    }

    async fn download(&self, object: &SourceObject) -> SourceResult<Download> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let bytes = Bytes::from(format!("bytes-of-{}", object.object_id));
        Ok(Download {
            metadata: SourceMetadata {
                mime_type: object.mime_type.clone(),
                size_bytes: bytes.len() as u64,
            },
            bytes,
        })
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub store: StateStore,
    pub source: Arc<FakeSource>,
    pub shutdown: CancellationToken,
    pub dispatcher: JoinHandle<MigrationReport>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new(source: FakeSource, max_concurrent: usize, capacity: usize) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = StateStore::open(&temp_dir.path().join("state.db"), 2)
            .await
            .unwrap();
        let source = Arc::new(source);
        let destination = LocalDestination::new(temp_dir.path().join("destination"))
            .await
            .unwrap();

        let settings = PipelineSettings {
            retry: RetryPolicy::new(&RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter: Duration::ZERO,
            }),
            call_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(60),
            root_folder: "Slack Archive".to_string(),
            folder_prefix: "Slack - ".to_string(),
        };
        let pipeline = Pipeline::new(
            store.clone(),
            source.clone(),
            Arc::new(destination),
            Arc::new(NoopAnnotator),
            Staging::new(temp_dir.path().join("scratch")),
            settings,
        );

        let shutdown = CancellationToken::new();
        let (intake, dispatcher) = IntakeQueue::start(
            pipeline,
            store.clone(),
            AdmissionPolicy::new(vec!["png".to_string(), "jpg".to_string()], 1024 * 1024),
            max_concurrent,
            capacity,
            shutdown.clone(),
        );
        let state = AppState::new(intake, SECRET, Duration::from_secs(300));
        let server = TestServer::new(router(state, ENDPOINT).into_make_service())
            .expect("Failed to create test server");

        Self {
            server,
            store,
            source,
            shutdown,
            dispatcher,
            _temp_dir: temp_dir,
        }
    }

    /// POST `body` to the intake endpoint with a valid signature
    pub async fn post_signed(&self, body: &Value) -> axum_test::TestResponse {
        let body = body.to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let signature = compute_signature(SECRET, &timestamp, body.as_bytes());
        self.server
            .post(ENDPOINT)
            .add_header("X-Ferry-Request-Timestamp", timestamp)
            .add_header("X-Ferry-Signature", signature)
            .add_header("Content-Type", "application/json")
            .bytes(Bytes::from(body))
            .await
    }

    pub async fn wait_for_status(&self, object_id: &str, status: MigrationStatus) {
        for _ in 0..500 {
            if let Some(record) = self.store.records().get(object_id).await.unwrap() {
                if record.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never reached {}", object_id, status);
    }

    pub async fn stop(self) -> MigrationReport {
        self.shutdown.cancel();
        self.source.open_gate();
        self.dispatcher.await.unwrap()
    }
}

pub fn notification(object_id: &str) -> Value {
    json!({
        "object_id": object_id,
        "container_id": "C1",
        "uploader_id": "U1",
        "created_at": 1_700_000_000,
        "content_ref": format!("https://files.example.com/{}", object_id),
        "name": format!("{}.png", object_id.to_lowercase()),
        "mime_type": "image/png",
        "file_type": "png",
        "size_bytes": 16
    })
}
