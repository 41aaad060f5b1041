//! Locating and loading the TOML config file.

mod loader;
mod paths;
mod template;


pub use loader::{load_default, load_from_path, write_default_config};
pub use paths::{default_config_path, locate_config, ConfigLocation, CONFIG_ENV, LOCAL_CONFIG_FILE};
