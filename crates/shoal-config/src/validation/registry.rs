//! Validation for the `[registry]` section.

use crate::schema::ShoalConfig;

use super::helpers::{validate_non_empty, validate_range};

pub(crate) fn validate_registry(errors: &mut Vec<String>, config: &ShoalConfig) {
    let registry = &config.registry;

    if let Some(key) = &registry.resume_key {
        validate_non_empty(errors, "registry.resume_key", key);
    }
    validate_range(
        errors,
        "registry.resume_timeout_secs",
        registry.resume_timeout_secs,
        1,
        3600,
    );
    validate_range(
        errors,
        "registry.reconnect_interval_ms",
        registry.reconnect_interval_ms,
        100,
        600_000,
    );
    validate_range(
        errors,
        "registry.rest_timeout_ms",
        registry.rest_timeout_ms,
        1,
        600_000,
    );
    validate_range(
        errors,
        "registry.voice_connection_timeout_ms",
        registry.voice_connection_timeout_ms,
        1,
        600_000,
    );
    validate_non_empty(errors, "registry.user_agent", &registry.user_agent);
}
