use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Retry ceiling and backoff bounds applied to every collaborator call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each backoff
    pub jitter: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    /// Listing page size
    pub batch_size: usize,
    /// Pipelines in flight on the batch path
    pub max_concurrent: usize,
    pub retry: RetryConfig,
    /// Per-call timeout for source, destination and annotator calls
    pub call_timeout: Duration,
    /// How long a claim stays valid without being renewed by a write
    pub claim_lease: Duration,
    pub stale_claim_reap_interval: Duration,
    /// Lowercase file types accepted for migration; empty accepts everything
    pub allowed_file_types: Vec<String>,
    pub max_file_size_bytes: u64,
    /// Key of the page checkpoint row used by batch runs
    pub checkpoint_key: String,
}

impl MigrationConfig {
    pub fn with_overrides(mut self, batch_size: Option<usize>, max_concurrent: Option<usize>) -> Self {
        if let Some(batch_size) = batch_size {
            self.batch_size = batch_size;
        }
        if let Some(max_concurrent) = max_concurrent {
            self.max_concurrent = max_concurrent;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    pub secret: Option<String>,
    /// Pipelines in flight on the realtime path, independent of the batch pool
    pub max_concurrent: usize,
    pub queue_capacity: usize,
    /// Maximum age of a signed request before it is rejected as a replay
    pub signature_tolerance: Duration,
}

impl RealtimeConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Secret required by the realtime path, checked only when that path is started
    pub fn require_secret(&self) -> Result<&str, anyhow::Error> {
        match self.secret.as_deref() {
            Some(secret) if secret.len() >= 16 => Ok(secret),
            Some(_) => Err(anyhow::anyhow!(
                "WEBHOOK_SECRET must be at least 16 characters long"
            )),
            None => Err(anyhow::anyhow!(
                "WEBHOOK_SECRET must be set to accept realtime notifications"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationBackend {
    Local,
    Drive,
}

impl FromStr for DestinationBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "filesystem" => Ok(DestinationBackend::Local),
            "drive" | "google_drive" | "google-drive" => Ok(DestinationBackend::Drive),
            _ => Err(anyhow::anyhow!("Invalid destination backend: {}", s)),
        }
    }
}

/// Google Drive v3 destination settings
#[derive(Debug, Clone, PartialEq)]
pub struct DriveConfig {
    /// OAuth bearer token with the drive scope
    pub access_token: Option<String>,
    pub api_base: String,
    pub upload_base: String,
    /// Folder the root folder is created under (`root` is My Drive)
    pub parent_folder_id: Option<String>,
    /// Shared drive to search and create in
    pub shared_drive_id: Option<String>,
    /// Users granted access to every uploaded file
    pub share_with: Vec<String>,
    pub share_role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationConfig {
    pub backend: DestinationBackend,
    /// Filesystem root of the local destination tree
    pub root: PathBuf,
    /// Top level folder every container folder is created under
    pub root_folder: String,
    /// Prefix of per-container folder names
    pub folder_prefix: String,
    pub drive: DriveConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotatorProvider {
    None,
    GoogleVision,
}

impl FromStr for AnnotatorProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "noop" | "disabled" => Ok(AnnotatorProvider::None),
            "google_vision" | "google-vision" | "vision" => Ok(AnnotatorProvider::GoogleVision),
            _ => Err(anyhow::anyhow!("Invalid annotator provider: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorConfig {
    pub provider: AnnotatorProvider,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub features: Vec<String>,
    pub min_score: f32,
    pub max_results: u32,
    /// Route videos to the Video Intelligence API
    pub video_enabled: bool,
    pub video_endpoint: String,
    pub video_features: Vec<String>,
    /// Delay between long-running operation polls
    pub video_poll_interval: Duration,
    /// Give up on an operation after this long; must stay under the call timeout
    pub video_max_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Immutable application configuration, built once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub environment: String,
    pub database_path: PathBuf,
    pub database_max_connections: u32,
    pub scratch_dir: PathBuf,
    pub log_format: LogFormat,
    pub migration: MigrationConfig,
    pub realtime: RealtimeConfig,
    pub slack: SlackConfig,
    pub destination: DestinationConfig,
    pub annotator: AnnotatorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        const BATCH_SIZE: usize = 100;
        const MAX_CONCURRENT: usize = 5;
        const RETRY_ATTEMPTS: u32 = 3;
        const RETRY_BASE_DELAY_MS: u64 = 500;
        const RETRY_MAX_DELAY_MS: u64 = 60_000;
        const RETRY_JITTER_MS: u64 = 250;
        const CALL_TIMEOUT_SECS: u64 = 120;
        const CLAIM_LEASE_SECS: u64 = 900;
        const STALE_CLAIM_REAP_INTERVAL_SECS: u64 = 60;
        const MAX_FILE_SIZE_MB: u64 = 100;
        const DATABASE_MAX_CONNECTIONS: u32 = 5;
        const WEBHOOK_PORT: u16 = 8080;
        const WEBHOOK_MAX_CONCURRENT: usize = 4;
        const WEBHOOK_QUEUE_CAPACITY: usize = 256;
        const WEBHOOK_SIGNATURE_TOLERANCE_SECS: u64 = 300;
        const GOOGLE_VISION_MIN_SCORE: f32 = 0.5;
        const GOOGLE_VISION_MAX_RESULTS: u32 = 10;
        const GOOGLE_VIDEO_POLL_INTERVAL_SECS: u64 = 5;
        const GOOGLE_VIDEO_MAX_WAIT_SECS: u64 = 90;
        const DEFAULT_FILE_TYPES: &str = "jpg,jpeg,png,gif,webp,heic,mp4,mov,avi,webm,mkv";
        const DEFAULT_VISION_FEATURES: &str =
            "LABEL_DETECTION,TEXT_DETECTION,FACE_DETECTION,LANDMARK_DETECTION,LOGO_DETECTION";
        const DEFAULT_VIDEO_FEATURES: &str = "LABEL_DETECTION,TEXT_DETECTION";

        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let environment = parse_or("ENVIRONMENT", "development");

        let log_format = match get("LOG_FORMAT") {
            Some(value) => value.parse()?,
            None if environment == "production" => LogFormat::Json,
            None => LogFormat::Pretty,
        };

        let retry = RetryConfig {
            max_attempts: parse_or("RETRY_ATTEMPTS", &RETRY_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(RETRY_ATTEMPTS),
            base_delay: Duration::from_millis(
                parse_or("RETRY_BASE_DELAY_MS", &RETRY_BASE_DELAY_MS.to_string())
                    .parse()
                    .unwrap_or(RETRY_BASE_DELAY_MS),
            ),
            max_delay: Duration::from_millis(
                parse_or("RETRY_MAX_DELAY_MS", &RETRY_MAX_DELAY_MS.to_string())
                    .parse()
                    .unwrap_or(RETRY_MAX_DELAY_MS),
            ),
            jitter: Duration::from_millis(
                parse_or("RETRY_JITTER_MS", &RETRY_JITTER_MS.to_string())
                    .parse()
                    .unwrap_or(RETRY_JITTER_MS),
            ),
        };

        let max_file_size_mb: u64 = parse_or("MAX_FILE_SIZE_MB", &MAX_FILE_SIZE_MB.to_string())
            .parse()
            .unwrap_or(MAX_FILE_SIZE_MB);

        let migration = MigrationConfig {
            batch_size: parse_or("MIGRATION_BATCH_SIZE", &BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(BATCH_SIZE),
            max_concurrent: parse_or("MAX_CONCURRENT_DOWNLOADS", &MAX_CONCURRENT.to_string())
                .parse()
                .unwrap_or(MAX_CONCURRENT),
            retry,
            call_timeout: Duration::from_secs(
                parse_or("CALL_TIMEOUT_SECS", &CALL_TIMEOUT_SECS.to_string())
                    .parse()
                    .unwrap_or(CALL_TIMEOUT_SECS),
            ),
            claim_lease: Duration::from_secs(
                parse_or("CLAIM_LEASE_SECS", &CLAIM_LEASE_SECS.to_string())
                    .parse()
                    .unwrap_or(CLAIM_LEASE_SECS),
            ),
            stale_claim_reap_interval: Duration::from_secs(
                parse_or(
                    "STALE_CLAIM_REAP_INTERVAL_SECS",
                    &STALE_CLAIM_REAP_INTERVAL_SECS.to_string(),
                )
                .parse()
                .unwrap_or(STALE_CLAIM_REAP_INTERVAL_SECS),
            ),
            allowed_file_types: split_list(&parse_or("ALLOWED_FILE_TYPES", DEFAULT_FILE_TYPES))
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            checkpoint_key: parse_or("MIGRATION_CHECKPOINT_KEY", "default"),
        };

        let realtime = RealtimeConfig {
            host: parse_or("WEBHOOK_HOST", "0.0.0.0"),
            port: parse_or("WEBHOOK_PORT", &WEBHOOK_PORT.to_string())
                .parse()
                .unwrap_or(WEBHOOK_PORT),
            endpoint: parse_or("WEBHOOK_ENDPOINT", "/slack/webhook"),
            secret: get("WEBHOOK_SECRET"),
            max_concurrent: parse_or("WEBHOOK_MAX_CONCURRENT", &WEBHOOK_MAX_CONCURRENT.to_string())
                .parse()
                .unwrap_or(WEBHOOK_MAX_CONCURRENT),
            queue_capacity: parse_or("WEBHOOK_QUEUE_CAPACITY", &WEBHOOK_QUEUE_CAPACITY.to_string())
                .parse()
                .unwrap_or(WEBHOOK_QUEUE_CAPACITY),
            signature_tolerance: Duration::from_secs(
                parse_or(
                    "WEBHOOK_SIGNATURE_TOLERANCE_SECS",
                    &WEBHOOK_SIGNATURE_TOLERANCE_SECS.to_string(),
                )
                .parse()
                .unwrap_or(WEBHOOK_SIGNATURE_TOLERANCE_SECS),
            ),
        };

        let slack = SlackConfig {
            bot_token: get("SLACK_BOT_TOKEN"),
            api_base: parse_or("SLACK_API_BASE", "https://slack.com/api")
                .trim_end_matches('/')
                .to_string(),
        };

        let destination = DestinationConfig {
            backend: match get("DESTINATION_BACKEND") {
                Some(value) => value.parse()?,
                None => DestinationBackend::Local,
            },
            root: PathBuf::from(parse_or("DESTINATION_ROOT", "data/destination")),
            root_folder: parse_or("DESTINATION_ROOT_FOLDER", "Slack Archive"),
            folder_prefix: parse_or("DESTINATION_FOLDER_PREFIX", "Slack - "),
            drive: DriveConfig {
                access_token: get("DRIVE_ACCESS_TOKEN"),
                api_base: parse_or("DRIVE_API_BASE", "https://www.googleapis.com/drive/v3")
                    .trim_end_matches('/')
                    .to_string(),
                upload_base: parse_or(
                    "DRIVE_UPLOAD_BASE",
                    "https://www.googleapis.com/upload/drive/v3",
                )
                .trim_end_matches('/')
                .to_string(),
                parent_folder_id: get("DRIVE_PARENT_FOLDER_ID"),
                shared_drive_id: get("DRIVE_SHARED_DRIVE_ID"),
                share_with: split_list(&parse_or("DRIVE_SHARE_WITH", "")),
                share_role: parse_or("DRIVE_SHARE_ROLE", "reader").to_lowercase(),
            },
        };

        let annotator = AnnotatorConfig {
            provider: match get("ANNOTATOR_PROVIDER") {
                Some(value) => value.parse()?,
                None if get("GOOGLE_VISION_API_KEY").is_some() => AnnotatorProvider::GoogleVision,
                None => AnnotatorProvider::None,
            },
            api_key: get("GOOGLE_VISION_API_KEY"),
            endpoint: parse_or(
                "GOOGLE_VISION_ENDPOINT",
                "https://vision.googleapis.com/v1/images:annotate",
            ),
            features: split_list(&parse_or("GOOGLE_VISION_FEATURES", DEFAULT_VISION_FEATURES)),
            min_score: parse_or("GOOGLE_VISION_MIN_SCORE", &GOOGLE_VISION_MIN_SCORE.to_string())
                .parse()
                .unwrap_or(GOOGLE_VISION_MIN_SCORE),
            max_results: parse_or(
                "GOOGLE_VISION_MAX_RESULTS",
                &GOOGLE_VISION_MAX_RESULTS.to_string(),
            )
            .parse()
            .unwrap_or(GOOGLE_VISION_MAX_RESULTS),
            video_enabled: parse_or("GOOGLE_VIDEO_INTELLIGENCE_ENABLED", "true")
                .parse()
                .unwrap_or(true),
            video_endpoint: parse_or(
                "GOOGLE_VIDEO_INTELLIGENCE_ENDPOINT",
                "https://videointelligence.googleapis.com/v1/videos:annotate",
            ),
            video_features: split_list(&parse_or(
                "GOOGLE_VIDEO_INTELLIGENCE_FEATURES",
                DEFAULT_VIDEO_FEATURES,
            )),
            video_poll_interval: Duration::from_secs(
                parse_or(
                    "GOOGLE_VIDEO_POLL_INTERVAL_SECS",
                    &GOOGLE_VIDEO_POLL_INTERVAL_SECS.to_string(),
                )
                .parse()
                .unwrap_or(GOOGLE_VIDEO_POLL_INTERVAL_SECS),
            ),
            video_max_wait: Duration::from_secs(
                parse_or(
                    "GOOGLE_VIDEO_MAX_WAIT_SECS",
                    &GOOGLE_VIDEO_MAX_WAIT_SECS.to_string(),
                )
                .parse()
                .unwrap_or(GOOGLE_VIDEO_MAX_WAIT_SECS),
            ),
        };

        Ok(Config {
            environment,
            database_path: PathBuf::from(parse_or("DATABASE_PATH", "data/migration.db")),
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                &DATABASE_MAX_CONNECTIONS.to_string(),
            )
            .parse()
            .unwrap_or(DATABASE_MAX_CONNECTIONS),
            scratch_dir: PathBuf::from(parse_or("SCRATCH_DIR", "downloads")),
            log_format,
            migration,
            realtime,
            slack,
            destination,
            annotator,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.migration.batch_size == 0 {
            return Err(anyhow::anyhow!("MIGRATION_BATCH_SIZE must be greater than 0"));
        }

        if self.migration.max_concurrent == 0 {
            return Err(anyhow::anyhow!(
                "MAX_CONCURRENT_DOWNLOADS must be greater than 0"
            ));
        }

        if self.migration.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("RETRY_ATTEMPTS must be at least 1"));
        }

        if self.migration.retry.base_delay > self.migration.retry.max_delay {
            return Err(anyhow::anyhow!(
                "RETRY_BASE_DELAY_MS must not exceed RETRY_MAX_DELAY_MS"
            ));
        }

        if self.migration.call_timeout.is_zero() {
            return Err(anyhow::anyhow!("CALL_TIMEOUT_SECS must be greater than 0"));
        }

        if self.migration.claim_lease <= self.migration.call_timeout {
            return Err(anyhow::anyhow!(
                "CLAIM_LEASE_SECS must be longer than CALL_TIMEOUT_SECS"
            ));
        }

        if self.realtime.max_concurrent == 0 || self.realtime.queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "WEBHOOK_MAX_CONCURRENT and WEBHOOK_QUEUE_CAPACITY must be greater than 0"
            ));
        }

        if !self.realtime.endpoint.starts_with('/') {
            return Err(anyhow::anyhow!("WEBHOOK_ENDPOINT must start with '/'"));
        }

        if self.destination.backend == DestinationBackend::Drive {
            if self.destination.drive.access_token.is_none() {
                return Err(anyhow::anyhow!(
                    "DESTINATION_BACKEND=drive requires DRIVE_ACCESS_TOKEN to be set"
                ));
            }
            if !matches!(
                self.destination.drive.share_role.as_str(),
                "reader" | "commenter" | "writer"
            ) {
                return Err(anyhow::anyhow!(
                    "DRIVE_SHARE_ROLE must be one of reader, commenter, writer"
                ));
            }
        }

        if self.annotator.provider == AnnotatorProvider::GoogleVision
            && self.annotator.api_key.is_none()
        {
            return Err(anyhow::anyhow!(
                "ANNOTATOR_PROVIDER=google_vision requires GOOGLE_VISION_API_KEY to be set"
            ));
        }

        if !(0.0..=1.0).contains(&self.annotator.min_score) {
            return Err(anyhow::anyhow!(
                "GOOGLE_VISION_MIN_SCORE must be between 0.0 and 1.0"
            ));
        }

        if self.annotator.provider == AnnotatorProvider::GoogleVision && self.annotator.video_enabled
        {
            if self.annotator.video_poll_interval.is_zero() {
                return Err(anyhow::anyhow!(
                    "GOOGLE_VIDEO_POLL_INTERVAL_SECS must be greater than 0"
                ));
            }
            if self.annotator.video_max_wait >= self.migration.call_timeout {
                return Err(anyhow::anyhow!(
                    "GOOGLE_VIDEO_MAX_WAIT_SECS must be shorter than CALL_TIMEOUT_SECS"
                ));
            }
        }

        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = config_from(&[]);
        assert_eq!(config.migration.batch_size, 100);
        assert_eq!(config.migration.max_concurrent, 5);
        assert_eq!(config.migration.retry.max_attempts, 3);
        assert_eq!(config.migration.max_file_size_bytes, 100 * 1024 * 1024);
        assert_eq!(config.realtime.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.annotator.provider, AnnotatorProvider::None);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config_from(&[
            ("MIGRATION_BATCH_SIZE", "25"),
            ("MAX_CONCURRENT_DOWNLOADS", "8"),
            ("ALLOWED_FILE_TYPES", "PNG, mp4"),
            ("LOG_FORMAT", "json"),
            ("GOOGLE_VISION_API_KEY", "key"),
        ]);
        assert_eq!(config.migration.batch_size, 25);
        assert_eq!(config.migration.max_concurrent, 8);
        assert_eq!(config.migration.allowed_file_types, vec!["png", "mp4"]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.annotator.provider, AnnotatorProvider::GoogleVision);
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = config_from(&[("MIGRATION_BATCH_SIZE", "lots")]);
        assert_eq!(config.migration.batch_size, 100);
    }

    #[test]
    fn cli_overrides_replace_values() {
        let config = config_from(&[]);
        let migration = config.migration.with_overrides(Some(7), None);
        assert_eq!(migration.batch_size, 7);
        assert_eq!(migration.max_concurrent, 5);
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = config_from(&[]);
        config.migration.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn vision_provider_requires_key() {
        let config = config_from(&[("ANNOTATOR_PROVIDER", "google_vision")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn drive_backend_requires_token_and_known_role() {
        let config = config_from(&[("DESTINATION_BACKEND", "drive")]);
        assert_eq!(config.destination.backend, DestinationBackend::Drive);
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("DESTINATION_BACKEND", "google_drive"),
            ("DRIVE_ACCESS_TOKEN", "ya29.token"),
            ("DRIVE_SHARE_WITH", "a@example.com, b@example.com"),
            ("DRIVE_API_BASE", "http://localhost:9000/drive/v3/"),
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.destination.drive.share_with,
            vec!["a@example.com", "b@example.com"]
        );
        assert_eq!(config.destination.drive.api_base, "http://localhost:9000/drive/v3");

        let config = config_from(&[
            ("DESTINATION_BACKEND", "drive"),
            ("DRIVE_ACCESS_TOKEN", "ya29.token"),
            ("DRIVE_SHARE_ROLE", "owner"),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn video_wait_must_fit_in_call_timeout() {
        let config = config_from(&[("GOOGLE_VISION_API_KEY", "key")]);
        assert!(config.annotator.video_enabled);
        assert_eq!(config.annotator.video_features, vec!["LABEL_DETECTION", "TEXT_DETECTION"]);
        assert!(config.validate().is_ok());

        let config = config_from(&[
            ("GOOGLE_VISION_API_KEY", "key"),
            ("GOOGLE_VIDEO_MAX_WAIT_SECS", "600"),
        ]);
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("GOOGLE_VISION_API_KEY", "key"),
            ("GOOGLE_VIDEO_MAX_WAIT_SECS", "600"),
            ("GOOGLE_VIDEO_INTELLIGENCE_ENABLED", "false"),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn realtime_secret_is_checked_on_demand() {
        let config = config_from(&[]);
        assert!(config.realtime.require_secret().is_err());

        let config = config_from(&[("WEBHOOK_SECRET", "short")]);
        assert!(config.realtime.require_secret().is_err());

        let config = config_from(&[("WEBHOOK_SECRET", "0123456789abcdef0123")]);
        assert_eq!(
            config.realtime.require_secret().unwrap(),
            "0123456789abcdef0123"
        );
    }
}
