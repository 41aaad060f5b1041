use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pool-wide policy shared by the registry, every node, and every voice link.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryOptions {
    /// Resume key. When set, nodes configure resuming on open and
    /// reconnect with a `Resume-Key` header.
    pub resume_key: Option<String>,
    /// Seconds the node keeps a detached session alive for resuming.
    pub resume_timeout_secs: u64,
    /// Reconnect attempts before a node is permanently removed.
    pub reconnect_tries: u32,
    /// Fixed delay between reconnect attempts, in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Migrate rooms of a failed node to another node instead of failing them.
    pub move_on_disconnect: bool,
    /// Timeout for REST requests, in milliseconds.
    pub rest_timeout_ms: u64,
    /// How long a voice link waits for both handshake fragments, in milliseconds.
    pub voice_connection_timeout_ms: u64,
    /// Sent as `User-Agent` and `Client-Name` on every node connection.
    pub user_agent: String,
}

impl fmt::Debug for RegistryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryOptions")
            .field("resume_key", &self.resume_key.as_ref().map(|_| "[REDACTED]"))
            .field("resume_timeout_secs", &self.resume_timeout_secs)
            .field("reconnect_tries", &self.reconnect_tries)
            .field("reconnect_interval_ms", &self.reconnect_interval_ms)
            .field("move_on_disconnect", &self.move_on_disconnect)
            .field("rest_timeout_ms", &self.rest_timeout_ms)
            .field(
                "voice_connection_timeout_ms",
                &self.voice_connection_timeout_ms,
            )
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            resume_key: None,
            resume_timeout_secs: 30,
            reconnect_tries: 2,
            reconnect_interval_ms: 5000,
            move_on_disconnect: false,
            rest_timeout_ms: 15000,
            voice_connection_timeout_ms: 15000,
            user_agent: default_user_agent(),
        }
    }
}

impl RegistryOptions {
    pub fn resumable(&self) -> bool {
        self.resume_key.is_some()
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }

    pub fn voice_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_connection_timeout_ms)
    }
}

fn default_user_agent() -> String {
    format!("shoal/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = RegistryOptions::default();
        assert!(!opts.resumable());
        assert_eq!(opts.reconnect_tries, 2);
        assert_eq!(opts.reconnect_interval(), Duration::from_secs(5));
        assert_eq!(opts.rest_timeout(), Duration::from_secs(15));
        assert_eq!(opts.voice_connection_timeout(), Duration::from_secs(15));
        assert!(opts.user_agent.starts_with("shoal/"));
    }

    #[test]
    fn debug_redacts_resume_key() {
        let opts = RegistryOptions {
            resume_key: Some("secret-key".into()),
            ..RegistryOptions::default()
        };
        let debug = format!("{opts:?}");
        assert!(!debug.contains("secret-key"));
    }
}
