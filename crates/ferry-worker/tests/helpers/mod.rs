//! Test helpers: in-memory collaborators and a store in a temp directory.
//!
//! Run from workspace root: `cargo test -p ferry-worker`.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::Semaphore;

use ferry_core::{
    MigrationConfig, MigrationRecord, MigrationStatus, RetryConfig, SourceObject, Tag, TagKind,
};
use ferry_db::StateStore;
use ferry_plugins::{Annotator, AnnotatorError, AnnotatorResult};
use ferry_source::{Download, Page, SourceArchive, SourceError, SourceMetadata, SourceResult};
use ferry_storage::{Destination, DestinationError, DestinationResult, FolderRef, UploadMetadata};
use ferry_worker::{AdmissionPolicy, Pipeline, PipelineSettings, RetryPolicy, Staging};

pub const MAX_ATTEMPTS: u32 = 3;

pub fn object(object_id: &str, container_id: &str) -> SourceObject {
    SourceObject {
        object_id: object_id.to_string(),
        container_id: container_id.to_string(),
        uploader_id: "U1".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        name: format!("{}.png", object_id.to_lowercase()),
        mime_type: Some("image/png".to_string()),
        file_type: Some("png".to_string()),
        size_bytes: Some(16),
        content_ref: Some(format!("https://files.example.com/{}", object_id)),
    }
}

pub fn content_of(object_id: &str) -> Bytes {
    Bytes::from(format!("bytes-of-{}", object_id))
}

pub fn retry_config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: Duration::ZERO,
    }
}

pub fn settings(max_attempts: u32, call_timeout: Duration) -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::new(&retry_config(max_attempts)),
        call_timeout,
        claim_lease: Duration::from_secs(60),
        root_folder: "Slack Archive".to_string(),
        folder_prefix: "Slack - ".to_string(),
    }
}

pub fn migration_config() -> MigrationConfig {
    MigrationConfig {
        batch_size: 2,
        max_concurrent: 2,
        retry: retry_config(MAX_ATTEMPTS),
        call_timeout: Duration::from_secs(5),
        claim_lease: Duration::from_secs(60),
        stale_claim_reap_interval: Duration::from_secs(60),
        allowed_file_types: vec!["png".to_string(), "jpg".to_string()],
        max_file_size_bytes: 1024,
        checkpoint_key: "test".to_string(),
    }
}

/// Number of files currently in a directory (zero when it does not exist)
pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}

/// Poll the store until the record reaches `status`
pub async fn wait_for_status(
    store: &StateStore,
    object_id: &str,
    status: MigrationStatus,
) -> MigrationRecord {
    for _ in 0..500 {
        if let Some(record) = store.records().get(object_id).await.unwrap() {
            if record.status == status {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never reached {}", object_id, status);
}

#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Paged source whose page tokens are page indexes
#[derive(Default)]
pub struct FakeSource {
    pages: Vec<Vec<SourceObject>>,
    download_errors: Mutex<HashMap<String, VecDeque<SourceError>>>,
    downloads: Mutex<HashMap<String, usize>>,
    failing_page: Mutex<Option<usize>>,
    requested_tokens: Mutex<Vec<Option<String>>>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    gauge: Gauge,
}

impl FakeSource {
    pub fn with_pages(pages: Vec<Vec<SourceObject>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Downloads block until [`FakeSource::open_gate`] is called
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Queue errors returned by the next downloads of `object_id`
    pub fn fail_downloads(&self, object_id: &str, errors: Vec<SourceError>) {
        self.download_errors
            .lock()
            .unwrap()
            .entry(object_id.to_string())
            .or_default()
            .extend(errors);
    }

    /// Make every listing of page `index` fail, or stop failing with `None`
    pub fn fail_page(&self, index: Option<usize>) {
        *self.failing_page.lock().unwrap() = index;
    }

    pub fn downloads_of(&self, object_id: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .get(object_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_downloads(&self) -> usize {
        self.downloads.lock().unwrap().values().sum()
    }

    pub fn requested_tokens(&self) -> Vec<Option<String>> {
        self.requested_tokens.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.gauge.max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceArchive for FakeSource {
    async fn list_page(&self, page_token: Option<&str>, _page_size: usize) -> SourceResult<Page> {
        self.requested_tokens
            .lock()
            .unwrap()
            .push(page_token.map(str::to_string));

        let index = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SourceError::Malformed(format!("bad page token {}", token)))?,
            None => 0,
        };
        if *self.failing_page.lock().unwrap() == Some(index) {
            return Err(SourceError::Transport("listing unavailable".to_string()));
        }

        let objects = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(Page {
            objects,
            next_page_token,
        })
    }

    async fn download(&self, object: &SourceObject) -> SourceResult<Download> {
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(object.object_id.clone())
            .or_default() += 1;

        self.gauge.enter();
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.gauge.leave();

        let scripted = self
            .download_errors
            .lock()
            .unwrap()
            .get_mut(&object.object_id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        let bytes = content_of(&object.object_id);
        Ok(Download {
            metadata: SourceMetadata {
                mime_type: object.mime_type.clone(),
                size_bytes: bytes.len() as u64,
            },
            bytes,
        })
    }
}

/// In-memory destination keyed by folder and object id
#[derive(Default)]
pub struct FakeDestination {
    objects: Mutex<HashMap<(String, String), String>>,
    uploads: Mutex<HashMap<String, usize>>,
    upload_errors: Mutex<VecDeque<DestinationError>>,
    descriptions: Mutex<HashMap<String, String>>,
}

impl FakeDestination {
    /// Pretend an earlier run already uploaded `object_id` into `folder`
    pub fn seed(&self, folder: &str, object_id: &str) -> String {
        let reference = format!("{}/{}__seeded", folder, object_id);
        self.objects.lock().unwrap().insert(
            (folder.to_string(), object_id.to_string()),
            reference.clone(),
        );
        reference
    }

    pub fn fail_uploads(&self, errors: Vec<DestinationError>) {
        self.upload_errors.lock().unwrap().extend(errors);
    }

    pub fn uploads_of(&self, object_id: &str) -> usize {
        self.uploads
            .lock()
            .unwrap()
            .get(object_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_uploads(&self) -> usize {
        self.uploads.lock().unwrap().values().sum()
    }

    pub fn description_of(&self, reference: &str) -> Option<String> {
        self.descriptions.lock().unwrap().get(reference).cloned()
    }
}

#[async_trait]
impl Destination for FakeDestination {
    async fn ensure_folder(&self, path: &[String]) -> DestinationResult<FolderRef> {
        Ok(FolderRef(path.join("/")))
    }

    async fn upload(
        &self,
        folder: &FolderRef,
        _data: Bytes,
        metadata: &UploadMetadata,
    ) -> DestinationResult<String> {
        *self
            .uploads
            .lock()
            .unwrap()
            .entry(metadata.object_id.clone())
            .or_default() += 1;

        if let Some(error) = self.upload_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let reference = format!("{}/{}__{}", folder.as_str(), metadata.object_id, metadata.name);
        self.objects.lock().unwrap().insert(
            (folder.as_str().to_string(), metadata.object_id.clone()),
            reference.clone(),
        );
        Ok(reference)
    }

    async fn find_by_source_id(
        &self,
        folder: &FolderRef,
        object_id: &str,
    ) -> DestinationResult<Option<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(folder.as_str().to_string(), object_id.to_string()))
            .cloned())
    }

    async fn describe(&self, destination_ref: &str, description: &str) -> DestinationResult<()> {
        self.descriptions
            .lock()
            .unwrap()
            .insert(destination_ref.to_string(), description.to_string());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotatorMode {
    Tags,
    Unsupported,
    Unavailable,
}

pub struct FakeAnnotator {
    mode: AnnotatorMode,
    calls: AtomicUsize,
}

impl FakeAnnotator {
    pub fn new(mode: AnnotatorMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Annotator for FakeAnnotator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(&self, _data: Bytes, mime_type: &str) -> AnnotatorResult<Vec<Tag>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            AnnotatorMode::Tags => Ok(vec![
                Tag::new(TagKind::Label, "Cat", 0.95, "fake"),
                Tag::new(TagKind::Label, "cat", 0.90, "fake"),
                Tag::new(TagKind::Text, "hello world", 1.0, "fake"),
            ]),
            AnnotatorMode::Unsupported => {
                Err(AnnotatorError::UnsupportedFormat(mime_type.to_string()))
            }
            AnnotatorMode::Unavailable => {
                Err(AnnotatorError::Transport("connection reset".to_string()))
            }
        }
    }
}

/// Store, scratch directory and fakes wired into a pipeline
pub struct TestEnv {
    pub store: StateStore,
    pub source: Arc<FakeSource>,
    pub destination: Arc<FakeDestination>,
    pub annotator: Arc<FakeAnnotator>,
    pub staging: Staging,
    pub pipeline: Pipeline,
    pub _temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new(source: FakeSource, annotator: AnnotatorMode) -> Self {
        Self::with_settings(source, annotator, settings(MAX_ATTEMPTS, Duration::from_secs(5)))
            .await
    }

    pub async fn with_settings(
        source: FakeSource,
        annotator: AnnotatorMode,
        settings: PipelineSettings,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = StateStore::open(&temp_dir.path().join("state.db"), 5)
            .await
            .expect("Failed to open state store");
        let staging = Staging::new(temp_dir.path().join("scratch"));

        let source = Arc::new(source);
        let destination = Arc::new(FakeDestination::default());
        let annotator = Arc::new(FakeAnnotator::new(annotator));
        let pipeline = Pipeline::new(
            store.clone(),
            source.clone(),
            destination.clone(),
            annotator.clone(),
            staging.clone(),
            settings,
        );

        Self {
            store,
            source,
            destination,
            annotator,
            staging,
            pipeline,
            _temp_dir: temp_dir,
        }
    }

    pub fn admission(&self) -> AdmissionPolicy {
        AdmissionPolicy::from_config(&migration_config())
    }

    pub async fn record(&self, object_id: &str) -> MigrationRecord {
        self.store
            .records()
            .get(object_id)
            .await
            .unwrap()
            .expect("record should exist")
    }
}
