//! Reading the config file, and seeding the per-user default.

use std::path::Path;

use shoal_common::ConfigError;
use tracing::{info, warn};

use super::paths::{locate_config, ConfigLocation};
use super::template::default_config_toml;
use crate::schema::ShoalConfig;
use crate::validation;

/// Load config from a specific TOML file path.
///
/// Missing fields fall back to serde defaults. Validation problems are
/// logged as a warning and the parsed config is returned as-is; callers
/// that need a hard failure run [`validation::validate`] themselves.
pub fn load_from_path(path: &Path) -> Result<ShoalConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::ParseError(format!("failed to read {}: {e}", path.display())),
    })?;

    let config: ShoalConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
    }

    info!(path = %path.display(), nodes = config.nodes.len(), "Config loaded");
    Ok(config)
}

/// Load config from wherever [`locate_config`] finds it.
///
/// A missing per-user file is created from the commented template and
/// defaults are returned; a missing `SHOAL_CONFIG` file is an error.
pub fn load_default() -> Result<ShoalConfig, ConfigError> {
    load_located(&locate_config()?)
}

pub(crate) fn load_located(location: &ConfigLocation) -> Result<ShoalConfig, ConfigError> {
    match load_from_path(location.path()) {
        Err(ConfigError::FileNotFound(path)) if location.creatable() => {
            write_default_config(&path)?;
            Ok(ShoalConfig::default())
        }
        result => result,
    }
}

/// Write the commented template to `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let io_error = |action: &str, target: &Path, e: std::io::Error| {
        ConfigError::ParseError(format!("failed to {action} {}: {e}", target.display()))
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
    }
    std::fs::write(path, default_config_toml()).map_err(|e| io_error("write", path, e))?;

    info!(path = %path.display(), "Created default config");
    Ok(())
}
