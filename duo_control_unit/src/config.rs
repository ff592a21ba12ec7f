//! Configuration loading for the drive node.
//!
//! Parses a `DriveConfig` TOML file and runs `validate()` before anything
//! is allocated. A missing file falls back to the compiled-in defaults only
//! when the caller did not name one explicitly.

use std::path::Path;

use duo_common::config::{ConfigError, DriveConfig};
use tracing::{info, warn};

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<DriveConfig, ConfigError> {
    let config = DriveConfig::load(path)?;
    config.validate()?;
    info!(
        path = %path.display(),
        loop_hz = config.control.loop_frequency_hz,
        max_rpm = config.limits.max_velocity_rpm,
        "configuration loaded"
    );
    Ok(config)
}

/// Parse and validate configuration from a TOML string (for testing).
pub fn load_config_from_str(content: &str) -> Result<DriveConfig, ConfigError> {
    let config = DriveConfig::from_toml_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load `path` if given, otherwise use defaults.
///
/// An explicitly named file that does not exist is an error; the default
/// location is optional.
pub fn load_or_default(path: Option<&Path>, default_path: &Path) -> Result<DriveConfig, ConfigError> {
    match path {
        Some(p) => load_config(p),
        None => match load_config(default_path) {
            Err(ConfigError::FileNotFound) => {
                warn!(
                    path = %default_path.display(),
                    "no configuration file, using built-in defaults"
                );
                let config = DriveConfig::default();
                config.validate()?;
                Ok(config)
            }
            other => other,
        },
    }
}
