//! Locating the config file.
//!
//! Lookup order: the `SHOAL_CONFIG` environment variable, a `shoal.toml`
//! in the working directory, then `shoal/config.toml` under the platform
//! config dir. Only the platform file is written from the template when
//! it does not exist yet.

use std::path::{Path, PathBuf};

use shoal_common::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SHOAL_CONFIG";

/// Per-deployment config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "shoal.toml";

/// A resolved config file and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Named by `SHOAL_CONFIG`; a missing file is an error.
    Env(PathBuf),
    /// `shoal.toml` in the working directory.
    Local(PathBuf),
    /// The per-user default.
    Platform(PathBuf),
}

impl ConfigLocation {
    pub fn path(&self) -> &Path {
        match self {
            ConfigLocation::Env(path) | ConfigLocation::Local(path) | ConfigLocation::Platform(path) => {
                path
            }
        }
    }

    /// Whether a missing file here should be created from the template.
    pub fn creatable(&self) -> bool {
        matches!(self, ConfigLocation::Platform(_))
    }
}

/// Resolve the config file for this process.
pub fn locate_config() -> Result<ConfigLocation, ConfigError> {
    resolve(
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        std::env::current_dir().ok(),
        dirs::config_dir(),
    )
}

/// Path of the config file `load_default` reads.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    locate_config().map(|location| location.path().to_path_buf())
}

pub(crate) fn resolve(
    env_path: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Result<ConfigLocation, ConfigError> {
    if let Some(path) = env_path.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(ConfigLocation::Env(path));
    }
    if let Some(local) = working_dir
        .map(|dir| dir.join(LOCAL_CONFIG_FILE))
        .filter(|path| path.is_file())
    {
        return Ok(ConfigLocation::Local(local));
    }
    let dir = config_dir.ok_or_else(|| {
        ConfigError::ParseError(format!(
            "no config directory on this platform; set {CONFIG_ENV} or add ./{LOCAL_CONFIG_FILE}"
        ))
    })?;
    Ok(ConfigLocation::Platform(dir.join("shoal").join("config.toml")))
}
