use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state shared by node connections and voice links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` follows the connection lifecycle.
    ///
    /// `Connecting` is only reachable from `Disconnected`, `Connected` only
    /// from `Connecting`. Any state may fall back to `Disconnected`, and
    /// `Disconnecting` is entered from any live state on explicit removal.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting | Connected, Disconnecting) => true,
            (_, Disconnected) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
