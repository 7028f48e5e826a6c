//! Yandex.Disk public-resource fetcher
//!
//! Resolves a public link through the Disk REST API, checks name and size, then
//! streams the file to disk while reporting byte progress.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::{AcquiredMedia, MediaFetcher, ProgressSink, StageError, StageResult};
use crate::services::validation::{validate_file_extension, validate_file_size};

pub const DEFAULT_API_BASE: &str = "https://cloud-api.yandex.net/v1/disk/public/resources";
const USER_AGENT: &str = concat!("abtgs-server/", env!("CARGO_PKG_VERSION"));
const FALLBACK_FILENAME: &str = "video_source.mp4";
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
struct DownloadLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ResourceMeta {
    name: Option<String>,
    size: Option<u64>,
}

/// Fetcher for `yadi.sk` / `disk.yandex.*` public links
pub struct YandexDiskFetcher {
    http_client: reqwest::Client,
    api_base: String,
    max_file_size_bytes: u64,
    allowed_extensions: Vec<String>,
}

impl YandexDiskFetcher {
    pub fn new(
        api_base: impl Into<String>,
        max_file_size_bytes: u64,
        allowed_extensions: Vec<String>,
    ) -> StageResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StageError::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            max_file_size_bytes,
            allowed_extensions,
        })
    }

    async fn resolve_download_url(&self, public_key: &str) -> StageResult<String> {
        let link: DownloadLink = self
            .http_client
            .get(format!("{}/download", self.api_base))
            .query(&[("public_key", public_key)])
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(link.href)
    }

    /// Name and size, when the metadata endpoint answers
    async fn resource_meta(&self, public_key: &str) -> Option<ResourceMeta> {
        let response = self
            .http_client
            .get(&self.api_base)
            .query(&[("public_key", public_key)])
            .timeout(METADATA_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => r.json().await.ok(),
            Ok(r) => {
                tracing::warn!(status = %r.status(), "Resource metadata unavailable");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Resource metadata request failed");
                None
            }
        }
    }
}

#[async_trait]
impl MediaFetcher for YandexDiskFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path, progress: ProgressSink) -> StageResult<AcquiredMedia> {
        let download_url = self.resolve_download_url(url).await?;

        let mut original_filename = FALLBACK_FILENAME.to_string();
        if let Some(meta) = self.resource_meta(url).await {
            if let Some(name) = meta.name {
                original_filename = name;
            }
            validate_file_size(meta.size.unwrap_or(0), self.max_file_size_bytes)?;
        }
        validate_file_extension(&original_filename, &self.allowed_extensions)?;

        let response = self
            .http_client
            .get(&download_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let content_length = response.content_length().unwrap_or(0);
        let path: PathBuf = dest_dir.join(format!("source{}", extension_of(&original_filename)));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            if downloaded > self.max_file_size_bytes {
                return Err(StageError::FileTooLarge {
                    size: downloaded,
                    max: self.max_file_size_bytes,
                });
            }
            file.write_all(&chunk).await?;
            progress.report_bytes(downloaded, content_length);
        }
        file.flush().await?;

        tracing::info!(
            filename = %original_filename,
            size_bytes = downloaded,
            "Source downloaded"
        );

        Ok(AcquiredMedia {
            path,
            original_filename,
            size_bytes: downloaded,
        })
    }
}

fn extension_of(filename: &str) -> String {
    crate::services::validation::file_extension(filename).unwrap_or_default()
}
