//! Per-room playback surface.
//!
//! A `Player` owns the room's `VoiceLink`, mirrors the playback state the
//! node reports, and publishes `PlayerEvent`s to subscribers.

mod commands;
mod events;
mod handler;

use std::sync::Arc;

use shoal_common::Result;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

use crate::filters::FilterSettings;
use crate::link::VoiceLink;
use crate::node::NodeConnection;

pub use commands::PlayOptions;
pub use events::PlayerEvent;
pub use handler::bridge_timeout;

const EVENT_CAPACITY: usize = 64;

/// Local mirror of the node-side player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    /// Encoded track currently playing.
    pub track: Option<String>,
    pub paused: bool,
    /// Last known position in millis.
    pub position: u64,
    pub filters: FilterSettings,
}

pub struct Player {
    guild_id: String,
    link: VoiceLink,
    state: RwLock<PlaybackState>,
    events: broadcast::Sender<PlayerEvent>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("link", &self.link)
            .finish()
    }
}

impl Player {
    pub(crate) fn new(node: Arc<NodeConnection>, guild_id: String) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let link = VoiceLink::new(node, guild_id.clone(), events.clone());
        Arc::new(Self {
            guild_id,
            link,
            state: RwLock::new(PlaybackState::default()),
            events,
        })
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn link(&self) -> &VoiceLink {
        &self.link
    }

    /// Node currently hosting this player.
    pub async fn node(&self) -> Arc<NodeConnection> {
        self.link.node().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        let kind = event.kind();
        let delivered = self.events.send(event).unwrap_or(0);
        trace!(guild = %self.guild_id, event = kind, delivered, "Player event");
    }

    pub async fn snapshot(&self) -> PlaybackState {
        self.state.read().await.clone()
    }

    pub async fn track(&self) -> Option<String> {
        self.state.read().await.track.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }

    pub async fn position(&self) -> u64 {
        self.state.read().await.position
    }

    pub async fn filters(&self) -> FilterSettings {
        self.state.read().await.filters.clone()
    }

    pub async fn connect(&self, channel_id: &str, mute: bool, deaf: bool) -> Result<()> {
        self.link.connect(channel_id, mute, deaf).await
    }

    pub async fn disconnect(&self) {
        self.link.disconnect().await
    }

    /// Leave and rejoin voice, optionally into another channel, then resume.
    pub async fn attempt_reconnect(&self, channel_id: Option<String>) -> Result<()> {
        self.link.reconnect(channel_id).await?;
        self.resume().await;
        Ok(())
    }
}
