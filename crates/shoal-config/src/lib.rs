//! Shoal configuration system.
//!
//! TOML-based configuration for the node pool: client identity, registry
//! policy (resuming, reconnects, timeouts), the initial node list, and
//! logging. Every section uses serde defaults so partial configs work.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use shoal_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! for node in &config.nodes {
//!     println!("{} -> {}", node.name, node.ws_url());
//! }
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    ClientConfig, LogLevel, LoggingConfig, NodeOptions, RegistryOptions, ShoalConfig,
    CONFIG_SCHEMA_VERSION,
};
pub use toml_loader::{
    default_config_path, load_default, load_from_path, locate_config, ConfigLocation, CONFIG_ENV,
};

use shoal_common::ConfigError;

/// Load config from the located file and validate it.
pub fn load_config() -> Result<ShoalConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
