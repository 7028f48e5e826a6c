//! Configuration for abtgs-server
//!
//! Priority: command line → environment → TOML file → compiled defaults.
//! The TOML file lives at `<config_dir>/abtgs/abtgs-server.toml` unless
//! `--config` points elsewhere; every field is optional.

use abtgs_common::config::{ensure_directory, load_toml_or_default, resolve_root_folder, LoggingConfig};
use abtgs_common::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::s3_store::{S3Settings, DEFAULT_ENDPOINT, DEFAULT_REGION};
use crate::adapters::speechkit::{
    SpeechKitSettings, DEFAULT_OPERATION_URL, DEFAULT_RECOGNIZE_URL, DEFAULT_RESULTS_URL,
};
use crate::adapters::yandex_disk::DEFAULT_API_BASE;
use crate::models::Candidate;
use crate::utils::RetryPolicy;

pub const SERVICE_NAME: &str = "abtgs-server";

/// Environment variable carrying the SpeechKit API key
pub const SPEECHKIT_API_KEY_ENV: &str = "ABTGS_SPEECHKIT_API_KEY";

/// Environment variables carrying the object storage key pair
pub const S3_ACCESS_KEY_ID_ENV: &str = "ABTGS_S3_ACCESS_KEY_ID";
pub const S3_SECRET_ACCESS_KEY_ENV: &str = "ABTGS_S3_SECRET_ACCESS_KEY";

pub const DEFAULT_PORT: u16 = 5780;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub root_folder: Option<PathBuf>,
    pub max_concurrent_jobs: usize,
    /// Client polling interval advertised to UIs
    pub poll_interval_ms: u64,
    pub max_file_size_bytes: u64,
    pub allowed_url_hosts: Vec<String>,
    pub allowed_extensions: Vec<String>,
    /// Names flagging a speaker as off-screen voice
    pub technical_markers: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub retry: RetryPolicy,
    pub speechkit: SpeechKitConfig,
    pub object_storage: ObjectStorageConfig,
    pub yandex_disk_api: String,
    pub ffmpeg_path: PathBuf,
    pub event_bus_capacity: usize,
    /// Origins allowed to call the API from a browser; `"*"` allows any
    pub cors_origins: Vec<String>,
    /// Job submissions per client address per minute; 0 disables the limit
    pub create_rate_limit_per_minute: u32,
    /// Finished jobs are dropped from memory after this long; 0 keeps them
    pub job_retention_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            root_folder: None,
            max_concurrent_jobs: 2,
            poll_interval_ms: 2000,
            max_file_size_bytes: 1024 * 1024 * 1024,
            allowed_url_hosts: ["yadi.sk", "disk.yandex.ru", "disk.yandex.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_extensions: [
                ".mp3", ".wav", ".mov", ".mxf", ".mp4", ".wmv", ".avi", ".mkv", ".ogg", ".flac",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            technical_markers: vec!["ЗК".to_string()],
            candidates: Vec::new(),
            retry: RetryPolicy::default(),
            speechkit: SpeechKitConfig::default(),
            object_storage: ObjectStorageConfig::default(),
            yandex_disk_api: DEFAULT_API_BASE.to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            event_bus_capacity: 256,
            cors_origins: vec!["http://localhost:3000".to_string()],
            create_rate_limit_per_minute: 5,
            job_retention_secs: 24 * 60 * 60,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechKitConfig {
    pub api_key: Option<String>,
    pub recognize_url: String,
    pub results_url: String,
    pub operation_url: String,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for SpeechKitConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            recognize_url: DEFAULT_RECOGNIZE_URL.to_string(),
            results_url: DEFAULT_RESULTS_URL.to_string(),
            operation_url: DEFAULT_OPERATION_URL.to_string(),
            poll_interval_secs: 3,
            max_wait_secs: 2 * 60 * 60,
        }
    }
}

/// S3-compatible bucket the recognizer reads audio from
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub bucket: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Lifetime of the presigned URL given to the recognizer
    pub url_expiry_secs: u64,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bucket: None,
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            url_expiry_secs: 3600,
        }
    }
}

/// Working directories derived from the root folder
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDirs {
    pub root: PathBuf,
    /// Per-job scratch space
    pub temp: PathBuf,
    /// Raw uploads waiting for their job
    pub upload: PathBuf,
    /// Autosaved documents for completed uploads
    pub output: PathBuf,
}

impl ServiceDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            temp: root.join("temp"),
            upload: root.join("uploads"),
            output: root.join("output"),
            root,
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.root, &self.temp, &self.upload, &self.output] {
            ensure_directory(dir)?;
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// Load from `path`, or the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = abtgs_common::config::default_config_path(SERVICE_NAME);
        let config: Self = load_toml_or_default(path.or(default_path.as_deref()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.allowed_extensions.iter().any(|e| !e.starts_with('.')) {
            return Err(Error::Config(
                "allowed_extensions entries must start with '.'".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid bind address {}:{}: {}", self.host, self.port, e)))
    }

    /// Root folder with CLI and environment overrides applied
    pub fn dirs(&self, cli_root: Option<&Path>) -> ServiceDirs {
        ServiceDirs::new(resolve_root_folder(cli_root, self.root_folder.as_deref()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_retention(&self) -> Option<Duration> {
        (self.job_retention_secs > 0).then(|| Duration::from_secs(self.job_retention_secs))
    }

    /// SpeechKit settings, failing when no API key is configured
    pub fn speechkit_settings(&self) -> Result<SpeechKitSettings> {
        let api_key = resolve_speechkit_api_key(self.speechkit.api_key.as_deref()).ok_or_else(|| {
            Error::Config(format!(
                "SpeechKit API key not configured. Set {} or speechkit.api_key in {}.toml",
                SPEECHKIT_API_KEY_ENV, SERVICE_NAME
            ))
        })?;

        let mut settings = SpeechKitSettings::new(api_key);
        settings.recognize_url = self.speechkit.recognize_url.clone();
        settings.results_url = self.speechkit.results_url.clone();
        settings.operation_url = self.speechkit.operation_url.clone();
        settings.poll_interval = Duration::from_secs(self.speechkit.poll_interval_secs.max(1));
        settings.max_wait = Duration::from_secs(self.speechkit.max_wait_secs);
        Ok(settings)
    }

    /// Object storage settings, failing when the bucket or key pair is missing
    pub fn object_storage_settings(&self) -> Result<S3Settings> {
        let storage = &self.object_storage;
        let bucket = storage
            .bucket
            .clone()
            .filter(|b| is_valid_key(b))
            .ok_or_else(|| Error::Config("object_storage.bucket is not configured".to_string()))?;
        let access_key_id = resolve_secret(
            "Object storage access key id",
            S3_ACCESS_KEY_ID_ENV,
            storage.access_key_id.as_deref(),
        );
        let secret_access_key = resolve_secret(
            "Object storage secret key",
            S3_SECRET_ACCESS_KEY_ENV,
            storage.secret_access_key.as_deref(),
        );
        let (Some(access_key_id), Some(secret_access_key)) = (access_key_id, secret_access_key) else {
            return Err(Error::Config(format!(
                "Object storage keys not configured. Set {} and {} or object_storage.* in {}.toml",
                S3_ACCESS_KEY_ID_ENV, S3_SECRET_ACCESS_KEY_ENV, SERVICE_NAME
            )));
        };

        Ok(S3Settings {
            endpoint: storage.endpoint.clone(),
            bucket,
            region: storage.region.clone(),
            access_key_id,
            secret_access_key,
            url_expiry: Duration::from_secs(storage.url_expiry_secs.max(60)),
        })
    }
}

/// Resolve the SpeechKit key: environment first, then TOML
pub fn resolve_speechkit_api_key(toml_key: Option<&str>) -> Option<String> {
    resolve_secret("SpeechKit API key", SPEECHKIT_API_KEY_ENV, toml_key)
}

/// Environment first, then TOML; blank values count as unset
fn resolve_secret(label: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|k| is_valid_key(k));
    let toml_value = toml_value.filter(|k| is_valid_key(k));

    if env_value.is_some() && toml_value.is_some() {
        warn!("{} found in environment and TOML. Using environment.", label);
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Some(value);
    }
    toml_value.map(|value| {
        info!("{} loaded from TOML config", label);
        value.to_string()
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
