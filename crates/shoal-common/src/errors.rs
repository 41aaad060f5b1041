use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Errors raised by the node pool, voice links, and players.
///
/// The type is `Clone` because asynchronous failures are delivered to
/// subscribers over broadcast channels.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShoalError {
    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    /// Bad or missing parameters. Fails fast, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connect or handshake failure on a node transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected inbound message.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("voice connection was not established within {}ms", .0.as_millis())]
    RendezvousTimeout(Duration),

    #[error("no available nodes")]
    NodeExhausted,

    #[error("node disconnected: {0}")]
    NodeDisconnected(String),

    #[error("rest error: {0}")]
    Rest(String),
}

impl From<serde_json::Error> for ShoalError {
    fn from(err: serde_json::Error) -> Self {
        ShoalError::Protocol(err.to_string())
    }
}
