//! Google Drive v3 destination
//!
//! Folders are looked up by name under their parent and created when missing. Uploaded
//! files carry the source object id in `appProperties`, which is what
//! [`Destination::find_by_source_id`] queries.

use crate::keys::{object_file_name, sanitize_segment};
use crate::traits::{Destination, DestinationError, DestinationResult, FolderRef, UploadMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::DriveConfig;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const SOURCE_ID_PROPERTY: &str = "source_object_id";

/// Drive limits each appProperties entry to 124 bytes of key plus value
const MAX_PROPERTY_BYTES: usize = 124;

pub struct DriveDestination {
    http_client: reqwest::Client,
    config: DriveConfig,
    access_token: String,
    /// `{parent}/{name}` -> folder id; the lock also serializes lookup-then-create
    folders: Mutex<HashMap<String, String>>,
}

impl DriveDestination {
    pub fn new(config: &DriveConfig) -> DestinationResult<Self> {
        let access_token = config.access_token.clone().ok_or_else(|| {
            DestinationError::AuthError("DRIVE_ACCESS_TOKEN not configured".to_string())
        })?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| DestinationError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            config: config.clone(),
            access_token,
            folders: Mutex::new(HashMap::new()),
        })
    }

    /// Folder the configured root folder lives in
    fn top_parent(&self) -> &str {
        self.config
            .parent_folder_id
            .as_deref()
            .or(self.config.shared_drive_id.as_deref())
            .unwrap_or("root")
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.access_token)
            .query(&[("supportsAllDrives", "true")])
    }

    /// files.list restricted to the shared drive when one is configured
    async fn list_files(&self, query: &str) -> DestinationResult<Vec<DriveFile>> {
        let mut request = self
            .authorized(self.http_client.get(format!("{}/files", self.config.api_base)))
            .query(&[
                ("q", query),
                ("fields", "files(id, name)"),
                ("includeItemsFromAllDrives", "true"),
                ("pageSize", "10"),
            ]);
        if let Some(drive_id) = &self.config.shared_drive_id {
            request = request.query(&[("corpora", "drive"), ("driveId", drive_id.as_str())]);
        }

        let response = send(request).await?;
        let list: FileList = parse(response).await?;
        Ok(list.files)
    }

    async fn find_or_create_folder(&self, parent: &str, name: &str) -> DestinationResult<String> {
        let key = format!("{}/{}", parent, name);
        let mut folders = self.folders.lock().await;
        if let Some(id) = folders.get(&key) {
            return Ok(id.clone());
        }

        let query = format!(
            "name = {} and {} in parents and mimeType = '{}' and trashed = false",
            quote(name),
            quote(parent),
            FOLDER_MIME_TYPE
        );
        let id = match self.list_files(&query).await?.into_iter().next() {
            Some(existing) => existing.id,
            None => {
                let request = self
                    .authorized(self.http_client.post(format!("{}/files", self.config.api_base)))
                    .query(&[("fields", "id")])
                    .json(&json!({
                        "name": name,
                        "mimeType": FOLDER_MIME_TYPE,
                        "parents": [parent],
                    }));
                let created: DriveFile = parse(send(request).await?).await?;
                tracing::info!(folder = name, folder_id = %created.id, "Created Drive folder");
                created.id
            }
        };

        folders.insert(key, id.clone());
        Ok(id)
    }

    fn file_metadata(folder: &FolderRef, metadata: &UploadMetadata) -> DestinationResult<Value> {
        let mut properties = Map::new();
        properties.insert(
            SOURCE_ID_PROPERTY.to_string(),
            Value::String(metadata.object_id.clone()),
        );
        for (key, value) in &metadata.properties {
            if key.len() + value.len() > MAX_PROPERTY_BYTES {
                tracing::debug!(property = %key, "Property too long for appProperties, skipped");
                continue;
            }
            properties.insert(key.clone(), Value::String(value.clone()));
        }

        let mut file = json!({
            "name": object_file_name(&metadata.object_id, &metadata.name)?,
            "parents": [folder.as_str()],
            "appProperties": properties,
        });
        if let Some(mime_type) = &metadata.mime_type {
            file["mimeType"] = Value::String(mime_type.clone());
        }
        if let Some(description) = &metadata.description {
            file["description"] = Value::String(description.clone());
        }
        Ok(file)
    }

    /// Grant the configured users access; failures are logged, the upload stands
    async fn share(&self, file_id: &str) {
        for email in &self.config.share_with {
            let request = self
                .authorized(self.http_client.post(format!(
                    "{}/files/{}/permissions",
                    self.config.api_base, file_id
                )))
                .query(&[("sendNotificationEmail", "false")])
                .json(&json!({
                    "type": "user",
                    "role": self.config.share_role,
                    "emailAddress": email,
                }));
            if let Err(e) = send(request).await {
                tracing::warn!(file_id, email = %email, error = %e, "Failed to share Drive file");
            }
        }
    }
}

/// Quote a value for a Drive search query
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// multipart/related body with the JSON metadata part followed by the media part
fn multipart_body(boundary: &str, metadata: &Value, mime_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n",
            boundary, metadata
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{}\r\nContent-Type: {}\r\n\r\n", boundary, mime_type).as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

async fn send(request: RequestBuilder) -> DestinationResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| DestinationError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = format!("{} - {}", status, error_text);

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => DestinationError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED => DestinationError::AuthError(message),
        StatusCode::FORBIDDEN if error_text.contains("storageQuotaExceeded") => {
            DestinationError::QuotaExceeded(message)
        }
        StatusCode::FORBIDDEN
            if error_text.contains("rateLimitExceeded")
                || error_text.contains("userRateLimitExceeded") =>
        {
            DestinationError::RateLimited { retry_after }
        }
        StatusCode::FORBIDDEN => DestinationError::AuthError(message),
        StatusCode::NOT_FOUND => DestinationError::NotFound(message),
        s if s.is_server_error() => DestinationError::Transport(message),
        _ => DestinationError::InvalidKey(message),
    })
}

async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> DestinationResult<T> {
    response
        .json()
        .await
        .map_err(|e| DestinationError::Transport(format!("Invalid Drive response: {}", e)))
}

#[async_trait]
impl Destination for DriveDestination {
    async fn ensure_folder(&self, path: &[String]) -> DestinationResult<FolderRef> {
        if path.is_empty() {
            return Err(DestinationError::InvalidKey(
                "Folder path must have at least one segment".to_string(),
            ));
        }

        let mut parent = self.top_parent().to_string();
        for segment in path {
            let name = sanitize_segment(segment)?;
            parent = self.find_or_create_folder(&parent, &name).await?;
        }

        tracing::debug!(folder_id = %parent, "Drive folder ready");
        Ok(FolderRef(parent))
    }

    async fn upload(
        &self,
        folder: &FolderRef,
        data: Bytes,
        metadata: &UploadMetadata,
    ) -> DestinationResult<String> {
        let file = Self::file_metadata(folder, metadata)?;
        let mime_type = metadata
            .mime_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let boundary = format!("ferry_{}", Uuid::new_v4().simple());
        let body = multipart_body(&boundary, &file, mime_type, &data);
        let size = data.len();
        let start = std::time::Instant::now();

        let request = self
            .authorized(self.http_client.post(format!("{}/files", self.config.upload_base)))
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body);
        let created: DriveFile = parse(send(request).await?).await?;

        tracing::info!(
            file_id = %created.id,
            folder_id = %folder.as_str(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Drive upload successful"
        );

        self.share(&created.id).await;
        Ok(created.id)
    }

    async fn find_by_source_id(
        &self,
        folder: &FolderRef,
        object_id: &str,
    ) -> DestinationResult<Option<String>> {
        let query = format!(
            "{} in parents and appProperties has {{ key='{}' and value={} }} and trashed = false",
            quote(folder.as_str()),
            SOURCE_ID_PROPERTY,
            quote(object_id)
        );
        Ok(self
            .list_files(&query)
            .await?
            .into_iter()
            .next()
            .map(|file| file.id))
    }

    async fn describe(&self, destination_ref: &str, description: &str) -> DestinationResult<()> {
        let request = self
            .authorized(self.http_client.patch(format!(
                "{}/files/{}",
                self.config.api_base, destination_ref
            )))
            .query(&[("fields", "id")])
            .json(&json!({ "description": description }));
        send(request).await?;

        tracing::debug!(destination_ref, "Description attached");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "drive"
    }
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::collections::BTreeMap;

    fn config(server_url: &str) -> DriveConfig {
        DriveConfig {
            access_token: Some("ya29.test".to_string()),
            api_base: format!("{}/drive/v3", server_url),
            upload_base: format!("{}/upload/drive/v3", server_url),
            parent_folder_id: None,
            shared_drive_id: None,
            share_with: Vec::new(),
            share_role: "reader".to_string(),
        }
    }

    fn metadata(object_id: &str) -> UploadMetadata {
        let mut properties = BTreeMap::new();
        properties.insert("slack_channel".to_string(), "C1".to_string());
        properties.insert("long".to_string(), "x".repeat(200));
        UploadMetadata {
            object_id: object_id.to_string(),
            name: "cat.png".to_string(),
            mime_type: Some("image/png".to_string()),
            properties,
            description: None,
        }
    }

    fn folder_query(name: &str, parent: &str) -> String {
        format!(
            "name = '{}' and '{}' in parents and mimeType = 'application/vnd.google-apps.folder' and trashed = false",
            name, parent
        )
    }

    #[test]
    fn quote_escapes_drive_query_literals() {
        assert_eq!(quote("O'Brien"), r"'O\'Brien'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn app_properties_skip_oversized_entries() {
        let file = DriveDestination::file_metadata(&FolderRef("folder-1".to_string()), &metadata("F1"))
            .unwrap();
        assert_eq!(file["name"], "F1__cat.png");
        assert_eq!(file["parents"], json!(["folder-1"]));
        assert_eq!(file["appProperties"]["source_object_id"], "F1");
        assert_eq!(file["appProperties"]["slack_channel"], "C1");
        assert!(file["appProperties"].get("long").is_none());
    }

    #[test]
    fn missing_token_is_rejected() {
        let mut config = config("http://127.0.0.1:9");
        config.access_token = None;
        assert!(matches!(
            DriveDestination::new(&config),
            Err(DestinationError::AuthError(_))
        ));
    }

    #[tokio::test]
    async fn ensure_folder_reuses_existing_and_creates_missing() {
        let mut server = mockito::Server::new_async().await;
        let existing = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                folder_query("Slack Archive", "root"),
            ))
            .match_header("authorization", "Bearer ya29.test")
            .with_body(json!({"files": [{"id": "archive-1", "name": "Slack Archive"}]}).to_string())
            .expect(1)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                folder_query("Slack - C1", "archive-1"),
            ))
            .with_body(json!({"files": []}).to_string())
            .expect(1)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded("supportsAllDrives".into(), "true".into()))
            .match_body(Matcher::PartialJson(json!({
                "name": "Slack - C1",
                "mimeType": "application/vnd.google-apps.folder",
                "parents": ["archive-1"]
            })))
            .with_body(json!({"id": "channel-1"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let destination = DriveDestination::new(&config(&server.url())).unwrap();
        let path = vec!["Slack Archive".to_string(), "Slack - C1".to_string()];
        let folder = destination.ensure_folder(&path).await.unwrap();
        assert_eq!(folder.as_str(), "channel-1");

        // Second lookup is served from the folder cache
        let again = destination.ensure_folder(&path).await.unwrap();
        assert_eq!(again, folder);

        existing.assert_async().await;
        missing.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn shared_drive_is_the_default_parent() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), folder_query("Slack Archive", "drive-9")),
                Matcher::UrlEncoded("corpora".into(), "drive".into()),
                Matcher::UrlEncoded("driveId".into(), "drive-9".into()),
            ]))
            .with_body(json!({"files": [{"id": "archive-9"}]}).to_string())
            .create_async()
            .await;

        let mut config = config(&server.url());
        config.shared_drive_id = Some("drive-9".to_string());
        let destination = DriveDestination::new(&config).unwrap();
        let folder = destination
            .ensure_folder(&["Slack Archive".to_string()])
            .await
            .unwrap();

        list.assert_async().await;
        assert_eq!(folder.as_str(), "archive-9");
    }

    #[tokio::test]
    async fn upload_sends_multipart_and_shares_file() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "multipart".into()))
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/related; boundary=ferry_".to_string()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""source_object_id":"F1""#.to_string()),
                Matcher::Regex(r#""name":"F1__cat.png""#.to_string()),
                Matcher::Regex("png-bytes".to_string()),
            ]))
            .with_body(json!({"id": "file-1"}).to_string())
            .create_async()
            .await;
        let share = server
            .mock("POST", "/drive/v3/files/file-1/permissions")
            .match_query(Matcher::UrlEncoded(
                "sendNotificationEmail".into(),
                "false".into(),
            ))
            .match_body(Matcher::PartialJson(json!({
                "type": "user",
                "role": "reader",
                "emailAddress": "team@example.com"
            })))
            .with_body(json!({"id": "perm-1"}).to_string())
            .create_async()
            .await;

        let mut config = config(&server.url());
        config.share_with = vec!["team@example.com".to_string()];
        let destination = DriveDestination::new(&config).unwrap();
        let reference = destination
            .upload(
                &FolderRef("channel-1".to_string()),
                Bytes::from_static(b"png-bytes"),
                &metadata("F1"),
            )
            .await
            .unwrap();

        upload.assert_async().await;
        share.assert_async().await;
        assert_eq!(reference, "file-1");
    }

    #[tokio::test]
    async fn failed_share_keeps_the_upload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::Any)
            .with_body(json!({"id": "file-2"}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/drive/v3/files/file-2/permissions")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": {"message": "Bad email"}}"#)
            .create_async()
            .await;

        let mut config = config(&server.url());
        config.share_with = vec!["not-an-email".to_string()];
        let destination = DriveDestination::new(&config).unwrap();
        let reference = destination
            .upload(
                &FolderRef("channel-1".to_string()),
                Bytes::from_static(b"x"),
                &metadata("F2"),
            )
            .await
            .unwrap();
        assert_eq!(reference, "file-2");
    }

    #[tokio::test]
    async fn find_by_source_id_queries_app_properties() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "'channel-1' in parents and appProperties has { key='source_object_id' and value='F1' } and trashed = false".into(),
            ))
            .with_body(json!({"files": [{"id": "file-1"}]}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/drive/v3/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "'channel-1' in parents and appProperties has { key='source_object_id' and value='F9' } and trashed = false".into(),
            ))
            .with_body(json!({"files": []}).to_string())
            .create_async()
            .await;

        let destination = DriveDestination::new(&config(&server.url())).unwrap();
        let folder = FolderRef("channel-1".to_string());
        assert_eq!(
            destination.find_by_source_id(&folder, "F1").await.unwrap(),
            Some("file-1".to_string())
        );
        assert_eq!(destination.find_by_source_id(&folder, "F9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn describe_patches_file() {
        let mut server = mockito::Server::new_async().await;
        let patch = server
            .mock("PATCH", "/drive/v3/files/file-1")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({"description": "Contains: Dog"})))
            .with_body(json!({"id": "file-1"}).to_string())
            .create_async()
            .await;
        server
            .mock("PATCH", "/drive/v3/files/gone")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let destination = DriveDestination::new(&config(&server.url())).unwrap();
        destination.describe("file-1", "Contains: Dog").await.unwrap();
        patch.assert_async().await;

        let err = destination.describe("gone", "x").await.unwrap_err();
        assert!(matches!(err, DestinationError::NotFound(_)));
    }

    #[tokio::test]
    async fn http_errors_are_classified() {
        let mut server = mockito::Server::new_async().await;
        for (path, status, body) in [
            ("/drive/v3/files/quota", 403, r#"{"error": {"errors": [{"reason": "storageQuotaExceeded"}]}}"#),
            ("/drive/v3/files/slow", 403, r#"{"error": {"errors": [{"reason": "userRateLimitExceeded"}]}}"#),
            ("/drive/v3/files/expired", 401, r#"{"error": {"message": "Invalid Credentials"}}"#),
            ("/drive/v3/files/down", 503, ""),
        ] {
            server
                .mock("PATCH", path)
                .match_query(Matcher::Any)
                .with_status(status)
                .with_body(body)
                .create_async()
                .await;
        }

        let destination = DriveDestination::new(&config(&server.url())).unwrap();
        let err = destination.describe("quota", "x").await.unwrap_err();
        assert!(matches!(err, DestinationError::QuotaExceeded(_)));
        let err = destination.describe("slow", "x").await.unwrap_err();
        assert!(matches!(err, DestinationError::RateLimited { .. }));
        let err = destination.describe("expired", "x").await.unwrap_err();
        assert!(matches!(err, DestinationError::AuthError(_)));
        let err = destination.describe("down", "x").await.unwrap_err();
        assert!(matches!(err, DestinationError::Transport(_)));
    }
}
