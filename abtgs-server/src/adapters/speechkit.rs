//! SpeechKit asynchronous recognizer (REST v3)
//!
//! Submits `recognizeFileAsync` for an uploaded object with speaker labeling
//! enabled, polls the operation until it is done, then downloads the
//! recognition stream from `getRecognition`. Every final refinement becomes
//! one diarized segment; its channel tag is the speaker label assigned by the
//! provider ("0", "1", ...).
//!
//! Speaker labeling expects mono input, which is what the transcoder produces.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::time::Duration;

use super::{Recognizer, StageError, StageResult, StorageRef};
use crate::models::{DiarizedSegment, EngineOptions};

pub const DEFAULT_RECOGNIZE_URL: &str = "https://stt.api.cloud.yandex.net/stt/v3/recognizeFileAsync";
pub const DEFAULT_RESULTS_URL: &str = "https://stt.api.cloud.yandex.net/stt/v3/getRecognition";
pub const DEFAULT_OPERATION_URL: &str = "https://operation.api.cloud.yandex.net/operations";

/// Connection settings for the recognizer
#[derive(Debug, Clone)]
pub struct SpeechKitSettings {
    pub api_key: String,
    pub recognize_url: String,
    pub results_url: String,
    pub operation_url: String,
    pub poll_interval: Duration,
    /// Give up on an operation that has not finished after this long
    pub max_wait: Duration,
}

impl SpeechKitSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            recognize_url: DEFAULT_RECOGNIZE_URL.to_string(),
            results_url: DEFAULT_RESULTS_URL.to_string(),
            operation_url: DEFAULT_OPERATION_URL.to_string(),
            poll_interval: Duration::from_secs(3),
            max_wait: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Operation {
    id: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// One line of the `getRecognition` stream
#[derive(Debug, Deserialize)]
struct RecognitionLine {
    result: Option<StreamingResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingResponse {
    channel_tag: Option<String>,
    final_refinement: Option<FinalRefinement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalRefinement {
    normalized_text: Option<AlternativeUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlternativeUpdate {
    #[serde(default)]
    alternatives: Vec<Alternative>,
    channel_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    text: String,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Word {
    #[serde(deserialize_with = "int64_millis")]
    start_time_ms: u64,
    #[serde(deserialize_with = "int64_millis")]
    end_time_ms: u64,
}

/// int64 fields arrive as JSON strings in REST responses
fn int64_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub struct SpeechKitRecognizer {
    http_client: reqwest::Client,
    settings: SpeechKitSettings,
}

impl SpeechKitRecognizer {
    pub fn new(settings: SpeechKitSettings) -> StageResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StageError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self { http_client, settings })
    }

    fn auth_header(&self) -> String {
        format!("Api-Key {}", self.settings.api_key)
    }

    async fn submit(&self, audio: &StorageRef, options: &EngineOptions) -> StageResult<String> {
        let response = self
            .http_client
            .post(&self.settings.recognize_url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(&recognize_request(&audio.uri, options))
            .send()
            .await
            .map_err(|e| StageError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::Recognition(format!("{}: {}", status, text)));
        }

        let operation: Operation = response
            .json()
            .await
            .map_err(|e| StageError::Recognition(format!("Malformed submit response: {}", e)))?;
        Ok(operation.id)
    }

    async fn wait_for(&self, operation_id: &str) -> StageResult<()> {
        let url = format!("{}/{}", self.settings.operation_url.trim_end_matches('/'), operation_id);
        let deadline = tokio::time::Instant::now() + self.settings.max_wait;

        loop {
            tokio::time::sleep(self.settings.poll_interval).await;

            let operation: Operation = self
                .http_client
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, self.auth_header())
                .send()
                .await
                .map_err(|e| StageError::Network(e.to_string()))?
                .json()
                .await
                .map_err(|e| StageError::Recognition(format!("Malformed operation response: {}", e)))?;

            if let Some(error) = operation.error {
                tracing::warn!(operation_id, code = error.code, message = %error.message, "Recognition failed");
                return Err(StageError::Recognition(error.message));
            }

            if operation.done {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(StageError::Recognition(format!(
                    "Operation {} not finished after {}s",
                    operation_id,
                    self.settings.max_wait.as_secs()
                )));
            }

            tracing::debug!(operation_id, "Recognition still running");
        }
    }

    async fn fetch_results(&self, operation_id: &str) -> StageResult<Vec<DiarizedSegment>> {
        let response = self
            .http_client
            .get(&self.settings.results_url)
            .query(&[("operationId", operation_id)])
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| StageError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::Recognition(format!("{}: {}", status, text)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StageError::Network(e.to_string()))?;
        segments_from_stream(&body)
    }
}

#[async_trait]
impl Recognizer for SpeechKitRecognizer {
    async fn recognize(&self, audio: &StorageRef, options: &EngineOptions) -> StageResult<Vec<DiarizedSegment>> {
        let operation_id = self.submit(audio, options).await?;
        tracing::info!(operation_id = %operation_id, object = %audio.object_name, "Recognition submitted");

        self.wait_for(&operation_id).await?;
        let segments = self.fetch_results(&operation_id).await?;

        tracing::info!(operation_id = %operation_id, segments = segments.len(), "Recognition finished");
        Ok(segments)
    }
}

/// `recognizeFileAsync` body: OGG/Opus, normalized text, speaker labels
fn recognize_request(uri: &str, options: &EngineOptions) -> serde_json::Value {
    json!({
        "uri": uri,
        "recognitionModel": {
            "model": options.model,
            "audioFormat": {
                "containerAudio": { "containerAudioType": "OGG_OPUS" }
            },
            "textNormalization": {
                "textNormalization": "TEXT_NORMALIZATION_ENABLED",
                "profanityFilter": options.profanity_filter,
                "literatureText": options.literature_text,
            },
            "languageRestriction": {
                "restrictionType": "WHITELIST",
                "languageCode": [options.language],
            },
            "audioProcessingType": "FULL_DATA",
        },
        "speakerLabeling": { "speakerLabeling": "SPEAKER_LABELING_ENABLED" },
    })
}

/// Parse the concatenated JSON objects returned by `getRecognition`
///
/// Only final refinements with at least one word become segments; partials
/// and utterance updates are skipped.
pub(crate) fn segments_from_stream(body: &str) -> StageResult<Vec<DiarizedSegment>> {
    let mut segments = Vec::new();

    for line in serde_json::Deserializer::from_str(body).into_iter::<RecognitionLine>() {
        let line = line.map_err(|e| StageError::Recognition(format!("Malformed recognition stream: {}", e)))?;
        let Some(response) = line.result else { continue };
        let Some(update) = response.final_refinement.and_then(|r| r.normalized_text) else {
            continue;
        };

        let tag = update
            .channel_tag
            .or(response.channel_tag)
            .unwrap_or_else(|| "0".to_string());
        let Some(alternative) = update.alternatives.into_iter().next() else {
            continue;
        };
        let (Some(first), Some(last)) = (alternative.words.first(), alternative.words.last()) else {
            continue;
        };

        segments.push(DiarizedSegment {
            start_offset_ms: first.start_time_ms,
            end_offset_ms: last.end_time_ms,
            tag,
            text: alternative.text,
        });
    }

    Ok(segments)
}
