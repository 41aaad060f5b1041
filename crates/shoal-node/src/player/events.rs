use shoal_common::ShoalError;

use crate::protocol::{PlayerState, TrackEnd, TrackException, TrackStart, WebSocketClosed};

/// Notifications published on a player's broadcast channel.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Start(TrackStart),
    /// A track finished or got stuck; stuck tracks carry reason `STUCK`.
    End(TrackEnd),
    Exception(TrackException),
    /// The node's voice connection for this room closed.
    Closed(WebSocketClosed),
    Update(PlayerState),
    /// Filters and the current track were replayed after a move or reconnect.
    Resumed,
    Error(ShoalError),
    /// The hosting node went away and the room could not be moved.
    NodeDisconnect(ShoalError),
}

impl PlayerEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerEvent::Start(_) => "start",
            PlayerEvent::End(_) => "end",
            PlayerEvent::Exception(_) => "exception",
            PlayerEvent::Closed(_) => "closed",
            PlayerEvent::Update(_) => "update",
            PlayerEvent::Resumed => "resumed",
            PlayerEvent::Error(_) => "error",
            PlayerEvent::NodeDisconnect(_) => "node_disconnect",
        }
    }
}
