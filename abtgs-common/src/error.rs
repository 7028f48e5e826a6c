//! Common error types for ABTGS

use thiserror::Error;

/// Common result type for ABTGS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across ABTGS crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed SMPTE timecode text
    #[error("Invalid timecode: {0}")]
    Timecode(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {}", err))
    }
}
