//! Validation for the `[[nodes]]` list.

use std::collections::HashSet;

use crate::schema::{NodeOptions, ShoalConfig};
use shoal_common::ConfigError;

use super::helpers::validate_non_empty;

pub(crate) fn validate_nodes(errors: &mut Vec<String>, config: &ShoalConfig) {
    let mut seen = HashSet::new();
    for (index, node) in config.nodes.iter().enumerate() {
        collect_node_errors(errors, &format!("nodes[{index}]"), node);
        if !node.name.is_empty() && !seen.insert(node.name.as_str()) {
            errors.push(format!("nodes[{index}].name '{}' is duplicated", node.name));
        }
    }
}

fn collect_node_errors(errors: &mut Vec<String>, prefix: &str, node: &NodeOptions) {
    validate_non_empty(errors, &format!("{prefix}.name"), &node.name);
    validate_non_empty(errors, &format!("{prefix}.host"), &node.host);
    validate_non_empty(errors, &format!("{prefix}.auth"), &node.auth);
    if node.port == 0 {
        errors.push(format!("{prefix}.port must not be 0"));
    }
    if let Some(group) = &node.group {
        validate_non_empty(errors, &format!("{prefix}.group"), group);
    }
}

/// Validate a single node definition, e.g. one added at runtime.
pub fn validate_node(node: &NodeOptions) -> Result<(), ConfigError> {
    let mut errors = Vec::new();
    collect_node_errors(&mut errors, "node", node);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
