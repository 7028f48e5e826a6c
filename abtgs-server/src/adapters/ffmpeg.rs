//! ffmpeg transcoder
//!
//! Runs `ffmpeg` as a child process to produce mono OGG/Opus at 48 kHz. The
//! child is killed if the transcode future is dropped (job cancellation).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{NormalizedAudio, StageError, StageResult, Transcoder};

/// Target sample rate
pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Longest stderr tail kept in an error message
const STDERR_TAIL_CHARS: usize = 400;

pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Verify the binary runs at all (`ffmpeg -version`)
    pub async fn check_available(&self) -> StageResult<String> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StageError::Internal(format!("{} not runnable: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            return Err(StageError::Internal(format!(
                "{} -version exited with {}",
                self.binary.display(),
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    fn arguments(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "libopus".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            SAMPLE_RATE_HZ.to_string(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> StageResult<NormalizedAudio> {
        tracing::debug!(input = %input.display(), output = %output.display(), "Starting ffmpeg");

        let result = Command::new(&self.binary)
            .args(Self::arguments(input, output))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = {
                let chars: Vec<char> = stderr.trim().chars().collect();
                let skip = chars.len().saturating_sub(STDERR_TAIL_CHARS);
                chars[skip..].iter().collect()
            };
            return Err(StageError::UnsupportedFormat(format!(
                "ffmpeg exited with {}: {}",
                result.status, tail
            )));
        }

        Ok(NormalizedAudio {
            path: output.to_path_buf(),
        })
    }
}
