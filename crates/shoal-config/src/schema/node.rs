use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection options for one backend node.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeOptions {
    /// Unique name used to address this node in the registry.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Shared credential sent as the `Authorization` header.
    pub auth: String,
    /// Use `wss://` and `https://` instead of `ws://` and `http://`.
    pub secure: bool,
    /// Optional group tag for group-restricted node selection.
    pub group: Option<String>,
}

impl fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOptions")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &"[REDACTED]")
            .field("secure", &self.secure)
            .field("group", &self.group)
            .finish()
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "localhost".into(),
            port: 2333,
            auth: String::new(),
            secure: false,
            group: None,
        }
    }
}

impl NodeOptions {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        auth: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            auth: auth.into(),
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// WebSocket URL of the node.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Base URL of the node's REST side-channel.
    pub fn rest_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_secure_flag() {
        let node = NodeOptions::new("main", "audio.local", 2333, "pass");
        assert_eq!(node.ws_url(), "ws://audio.local:2333");
        assert_eq!(node.rest_url(), "http://audio.local:2333");

        let node = node.with_secure(true);
        assert_eq!(node.ws_url(), "wss://audio.local:2333");
        assert_eq!(node.rest_url(), "https://audio.local:2333");
    }

    #[test]
    fn debug_redacts_auth() {
        let node = NodeOptions::new("main", "localhost", 2333, "youshallnotpass");
        let debug = format!("{node:?}");
        assert!(!debug.contains("youshallnotpass"));
        assert!(debug.contains("[REDACTED]"));
    }
}
