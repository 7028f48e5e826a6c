//! Submission checks applied before a job is created

use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    #[error("URL must use http or https")]
    UnsupportedScheme,

    #[error("URL must point to one of: {0}")]
    HostNotAllowed(String),

    #[error("Unsupported file format. Allowed: {0}")]
    UnsupportedExtension(String),

    #[error("File too large ({size} bytes, max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },
}

/// Accept only http(s) links to an allowed host
pub fn validate_url(url: &str, allowed_hosts: &[String]) -> Result<Url, ValidationError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ValidationError::MalformedUrl(e.to_string()))?;

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    if !allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
        return Err(ValidationError::HostNotAllowed(allowed_hosts.join(", ")));
    }

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme);
    }

    Ok(parsed)
}

/// Lower-cased extension including the dot, e.g. `.mp4`
pub fn file_extension(filename: &str) -> Option<String> {
    let idx = filename.rfind('.')?;
    let ext = &filename[idx..];
    (ext.len() > 1).then(|| ext.to_lowercase())
}

/// Accept only filenames whose extension is on the allow list
pub fn validate_file_extension(
    filename: &str,
    allowed_extensions: &[String],
) -> Result<(), ValidationError> {
    let allowed = file_extension(filename)
        .map(|ext| allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
        .unwrap_or(false);

    if allowed {
        Ok(())
    } else {
        let mut sorted = allowed_extensions.to_vec();
        sorted.sort();
        Err(ValidationError::UnsupportedExtension(sorted.join(", ")))
    }
}

pub fn validate_file_size(size: u64, max: u64) -> Result<(), ValidationError> {
    if size > max {
        Err(ValidationError::FileTooLarge { size, max })
    } else {
        Ok(())
    }
}
