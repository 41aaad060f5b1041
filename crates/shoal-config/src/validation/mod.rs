//! Full configuration validation.
//!
//! Each domain has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod nodes;
mod registry;


use crate::schema::ShoalConfig;
use shoal_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ShoalConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    registry::validate_registry(&mut errors, config);
    nodes::validate_nodes(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

pub use nodes::validate_node;
