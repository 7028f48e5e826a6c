//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is not fatal: the service logs a warning and starts on
//! compiled defaults. A TOML file that exists but does not parse is an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "ABTGS_ROOT_FOLDER";

/// Logging section shared by all service TOML files
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or full filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve the root folder following the priority order above
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("abtgs"))
        .unwrap_or_else(|| PathBuf::from("./abtgs_data"))
}

/// Default TOML path for a service: `<config_dir>/abtgs/<service>.toml`
pub fn default_config_path(service_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("abtgs").join(format!("{}.toml", service_name)))
}

/// Load a TOML config file, falling back to defaults when the file is absent
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config file location available, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Create a directory (and parents) if missing
pub fn ensure_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created directory {}", path.display());
    } else if !path.is_dir() {
        return Err(Error::Config(format!(
            "{} exists but is not a directory",
            path.display()
        )));
    }
    Ok(())
}
