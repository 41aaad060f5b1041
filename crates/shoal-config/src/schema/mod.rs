//! Configuration schema types for Shoal.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod client;
mod logging;
mod node;
mod registry;

pub use client::*;
pub use logging::*;
pub use node::*;
pub use registry::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShoalConfig {
    pub client: ClientConfig,
    pub registry: RegistryOptions,
    pub nodes: Vec<NodeOptions>,
    pub logging: LoggingConfig,
}
