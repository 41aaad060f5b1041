use serde::{Deserialize, Serialize};

/// Identity of the controlling client on the host platform.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Client user id, sent to every node as the `User-Id` header.
    /// Usually learned from the platform at runtime; empty means unset.
    pub id: String,
}
