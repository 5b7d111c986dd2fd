//! Slack Web API source archive

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{SlackConfig, SourceObject};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::traits::{Download, Page, SourceArchive, SourceError, SourceMetadata, SourceResult};

/// Slack caps `files.list` pages at this size
const MAX_PAGE_SIZE: usize = 200;
const LISTED_TYPES: &str = "images,videos";
const UNFILED_CONTAINER: &str = "unfiled";

/// A file object as returned by `files.list`, `files.info` and `file_shared` events
#[derive(Debug, Clone, Deserialize)]
pub struct SlackFile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filetype: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub ims: Vec<String>,
    #[serde(default)]
    pub url_private_download: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
}

impl SlackFile {
    pub fn into_source_object(self) -> SourceObject {
        let container_id = self
            .channels
            .first()
            .or_else(|| self.groups.first())
            .or_else(|| self.ims.first())
            .cloned()
            .unwrap_or_else(|| UNFILED_CONTAINER.to_string());
        let created_at = self
            .timestamp
            .or(self.created)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        let name = self
            .name
            .or(self.title)
            .unwrap_or_else(|| self.id.clone());

        SourceObject {
            object_id: self.id,
            container_id,
            uploader_id: self.user.unwrap_or_default(),
            created_at,
            name,
            mime_type: self.mimetype,
            file_type: self.filetype.map(|t| t.to_lowercase()),
            size_bytes: self.size,
            content_ref: self.url_private_download.or(self.url_private),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Paging {
    page: u32,
    pages: u32,
}

#[derive(Debug, Deserialize)]
struct FilesListResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    files: Vec<SlackFile>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct FilesInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    file: Option<SlackFile>,
}

/// Slack file archive client
pub struct SlackArchive {
    http_client: reqwest::Client,
    token: String,
    api_base: String,
}

impl Debug for SlackArchive {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SlackArchive")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl SlackArchive {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let token = config
            .bot_token
            .clone()
            .context("SLACK_BOT_TOKEN must be set to read the Slack archive")?;
        Self::with_api_base(token, config.api_base.clone())
    }

    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client for Slack API")?;

        Ok(Self {
            http_client,
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Map an HTTP-level failure onto the source error taxonomy
    async fn check_status(response: Response, what: &str) -> SourceResult<Response> {
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
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SourceError::Unauthorized(format!("{}: {} - {}", what, status, body))
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => SourceError::NotFound(what.to_string()),
            s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
                SourceError::Transport(format!("{}: {} - {}", what, status, body))
            }
            _ => SourceError::Malformed(format!("{}: {} - {}", what, status, body)),
        })
    }

    /// Map a Slack `ok: false` error code onto the source error taxonomy
    fn api_error(code: &str, what: &str) -> SourceError {
        match code {
            "ratelimited" => SourceError::RateLimited { retry_after: None },
            "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked"
            | "token_expired" | "missing_scope" | "no_permission" => {
                SourceError::Unauthorized(format!("{}: {}", what, code))
            }
            "file_not_found" | "file_deleted" => SourceError::NotFound(what.to_string()),
            "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
                SourceError::Transport(format!("{}: {}", what, code))
            }
            _ => SourceError::Malformed(format!("{}: {}", what, code)),
        }
    }

    /// Resolve the download URL of a file through `files.info`
    #[tracing::instrument(skip(self))]
    async fn resolve_download_url(&self, object_id: &str) -> SourceResult<String> {
        let response = self
            .http_client
            .get(self.endpoint("files.info"))
            .bearer_auth(&self.token)
            .query(&[("file", object_id)])
            .send()
            .await?;
        let response = Self::check_status(response, "files.info").await?;
        let info: FilesInfoResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("files.info: {}", e)))?;

        if !info.ok {
            let code = info.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(Self::api_error(&code, object_id));
        }

        info.file
            .and_then(|f| f.url_private_download.or(f.url_private))
            .ok_or_else(|| SourceError::NotFound(format!("{} has no download url", object_id)))
    }
}

#[async_trait]
impl SourceArchive for SlackArchive {
    #[tracing::instrument(skip(self))]
    async fn list_page(&self, page_token: Option<&str>, page_size: usize) -> SourceResult<Page> {
        let page: u32 = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| SourceError::Malformed(format!("invalid page token {:?}", token)))?,
            None => 1,
        };
        let count = page_size.clamp(1, MAX_PAGE_SIZE);

        let response = self
            .http_client
            .get(self.endpoint("files.list"))
            .bearer_auth(&self.token)
            .query(&[
                ("page", page.to_string()),
                ("count", count.to_string()),
                ("types", LISTED_TYPES.to_string()),
            ])
            .send()
            .await?;
        let response = Self::check_status(response, "files.list").await?;
        let listing: FilesListResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("files.list: {}", e)))?;

        if !listing.ok {
            let code = listing.error.unwrap_or_else(|| "unknown_error".to_string());
            return Err(Self::api_error(&code, "files.list"));
        }

        let next_page_token = match &listing.paging {
            Some(paging) if paging.page < paging.pages && !listing.files.is_empty() => {
                Some((paging.page + 1).to_string())
            }
            _ => None,
        };

        let objects: Vec<SourceObject> = listing
            .files
            .into_iter()
            .map(SlackFile::into_source_object)
            .collect();

        tracing::debug!(
            page,
            objects = objects.len(),
            has_next = next_page_token.is_some(),
            "Fetched Slack files page"
        );

        Ok(Page {
            objects,
            next_page_token,
        })
    }

    #[tracing::instrument(skip(self, object), fields(object.id = %object.object_id))]
    async fn download(&self, object: &SourceObject) -> SourceResult<Download> {
        let url = match object.content_ref.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => url.to_string(),
            None => self.resolve_download_url(&object.object_id).await?,
        };

        let start = std::time::Instant::now();
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check_status(response, &object.object_id).await?;

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        // Slack answers an unauthorized file fetch with its HTML sign-in page
        if mime_type.as_deref() == Some("text/html")
            && object.mime_type.as_deref() != Some("text/html")
        {
            return Err(SourceError::Unauthorized(format!(
                "{}: received sign-in page instead of file content",
                object.object_id
            )));
        }

        let bytes = response.bytes().await?;

        tracing::info!(
            object_id = %object.object_id,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Downloaded file from Slack"
        );

        Ok(Download {
            metadata: SourceMetadata {
                mime_type,
                size_bytes: bytes.len() as u64,
            },
            bytes,
        })
    }
}
