//! S3-compatible object store
//!
//! Uploads normalized audio to a bucket (Yandex Object Storage by default)
//! and hands the recognizer a presigned GET URL. Requests are signed locally
//! with `rusty-s3` and sent with the shared `reqwest` client; the file is
//! streamed, never buffered whole.

use async_trait::async_trait;
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::{ObjectStore, StageError, StageResult, StorageRef};

pub const DEFAULT_ENDPOINT: &str = "https://storage.yandexcloud.net";
pub const DEFAULT_REGION: &str = "ru-central1";

/// Validity of the signature on PUT and DELETE requests
const REQUEST_SIGNATURE_TTL: Duration = Duration::from_secs(15 * 60);

/// Bucket location and credentials
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Lifetime of the presigned URL handed to the recognizer
    pub url_expiry: Duration,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("url_expiry", &self.url_expiry)
            .finish_non_exhaustive()
    }
}

pub struct S3ObjectStore {
    http_client: reqwest::Client,
    bucket: Bucket,
    credentials: Credentials,
    url_expiry: Duration,
}

impl S3ObjectStore {
    pub fn new(settings: S3Settings) -> StageResult<Self> {
        let endpoint: reqwest::Url = settings
            .endpoint
            .parse()
            .map_err(|e| StageError::Internal(format!("Invalid storage endpoint {}: {}", settings.endpoint, e)))?;
        let bucket = Bucket::new(endpoint, UrlStyle::Path, settings.bucket.clone(), settings.region.clone())
            .map_err(|e| StageError::Internal(format!("Invalid bucket {}: {}", settings.bucket, e)))?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StageError::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            bucket,
            credentials: Credentials::new(settings.access_key_id, settings.secret_access_key),
            url_expiry: settings.url_expiry,
        })
    }

    /// Presigned GET for an object already in the bucket
    pub fn presigned_get(&self, object_name: &str) -> String {
        self.bucket
            .get_object(Some(&self.credentials), object_name)
            .sign(self.url_expiry)
            .to_string()
    }
}

/// Throttling and server-side failures are worth retrying
fn status_error(status: reqwest::StatusCode, body: &str) -> StageError {
    let transient = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    StageError::Storage {
        message: format!("Object storage returned {}: {}", status, body.trim()),
        transient,
    }
}

fn transport_error(e: reqwest::Error) -> StageError {
    StageError::Storage {
        message: format!("Object storage unreachable: {}", e),
        transient: true,
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, local: &Path, object_name: &str) -> StageResult<StorageRef> {
        let file = tokio::fs::File::open(local).await.map_err(|e| StageError::Storage {
            message: format!("Cannot open {}: {}", local.display(), e),
            transient: false,
        })?;
        let length = file.metadata().await?.len();

        let url = self
            .bucket
            .put_object(Some(&self.credentials), object_name)
            .sign(REQUEST_SIGNATURE_TTL);

        let response = self
            .http_client
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .header(reqwest::header::CONTENT_TYPE, "audio/ogg")
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        tracing::debug!(object = object_name, bytes = length, "Object uploaded");

        Ok(StorageRef {
            object_name: object_name.to_string(),
            uri: self.presigned_get(object_name),
        })
    }

    async fn delete(&self, object: &StorageRef) -> StageResult<()> {
        let url = self
            .bucket
            .delete_object(Some(&self.credentials), &object.object_name)
            .sign(REQUEST_SIGNATURE_TTL);

        let response = self.http_client.delete(url).send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}
