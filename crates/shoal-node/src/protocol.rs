//! Wire protocol between the client and a backend node.
//!
//! Outbound commands are `op`-tagged JSON objects with camelCase fields.
//! Inbound messages are either the node-wide `stats` snapshot or a
//! room-scoped `playerUpdate` / `event`.

use serde::{Deserialize, Serialize};

use crate::filters::FilterSettings;
use crate::gateway::VoiceServerFragment;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Commands sent to a node.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Play {
        guild_id: String,
        track: String,
        no_replace: bool,
        pause: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
    },
    Stop {
        guild_id: String,
    },
    Pause {
        guild_id: String,
        pause: bool,
    },
    Seek {
        guild_id: String,
        position: u64,
    },
    /// Full filter snapshot; `None` sends an empty command that resets
    /// every filter on the node.
    Filters {
        guild_id: String,
        #[serde(flatten, skip_serializing_if = "Option::is_none")]
        filters: Option<FilterSettings>,
    },
    Destroy {
        guild_id: String,
    },
    ConfigureResuming {
        key: String,
        timeout: u64,
    },
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: VoiceServerFragment,
    },
}

impl Command {
    /// Room the command is scoped to, if any.
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Command::Play { guild_id, .. }
            | Command::Stop { guild_id }
            | Command::Pause { guild_id, .. }
            | Command::Seek { guild_id, .. }
            | Command::Filters { guild_id, .. }
            | Command::Destroy { guild_id }
            | Command::VoiceUpdate { guild_id, .. } => Some(guild_id),
            Command::ConfigureResuming { .. } => None,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Command::Play { .. } => "play",
            Command::Stop { .. } => "stop",
            Command::Pause { .. } => "pause",
            Command::Seek { .. } => "seek",
            Command::Filters { .. } => "filters",
            Command::Destroy { .. } => "destroy",
            Command::ConfigureResuming { .. } => "configureResuming",
            Command::VoiceUpdate { .. } => "voiceUpdate",
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound: node stats
// ---------------------------------------------------------------------------

/// Node-wide load snapshot from a `stats` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    pub uptime: u64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Audio frame counters over the last minute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

// ---------------------------------------------------------------------------
// Inbound: room messages
// ---------------------------------------------------------------------------

/// Positional state from a `playerUpdate` message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerState {
    /// Node wall clock, unix millis.
    pub time: u64,
    /// Track position in millis, absent when nothing is playing.
    pub position: Option<u64>,
    pub connected: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerUpdateMessage {
    #[serde(rename = "guildId", alias = "roomId")]
    pub guild_id: String,
    #[serde(default)]
    pub state: PlayerState,
}

/// Why a track stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
    /// Synthesized from a stuck-track event.
    Stuck,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TrackEndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackEndReason::Finished => "FINISHED",
            TrackEndReason::LoadFailed => "LOAD_FAILED",
            TrackEndReason::Stopped => "STOPPED",
            TrackEndReason::Replaced => "REPLACED",
            TrackEndReason::Cleanup => "CLEANUP",
            TrackEndReason::Stuck => "STUCK",
            TrackEndReason::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TrackEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStart {
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEnd {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub reason: TrackEndReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStuck {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(rename = "thresholdMs", default)]
    pub threshold_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionInfo {
    pub message: Option<String>,
    pub severity: Option<String>,
    pub cause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackException {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub exception: Option<ExceptionInfo>,
    /// Older nodes report a bare message instead of `exception`.
    #[serde(default)]
    pub error: Option<String>,
}

/// The node's voice websocket for a room was closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketClosed {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "byRemote", default)]
    pub by_remote: bool,
}

/// Sub-types of an `event` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename = "TrackStartEvent", alias = "TrackStart")]
    Start(TrackStart),
    #[serde(rename = "TrackEndEvent", alias = "TrackEnd")]
    End(TrackEnd),
    #[serde(rename = "TrackExceptionEvent", alias = "TrackException")]
    Exception(TrackException),
    #[serde(rename = "TrackStuckEvent", alias = "TrackStuck")]
    Stuck(TrackStuck),
    #[serde(rename = "WebSocketClosedEvent", alias = "WebSocketClosed")]
    WebSocketClosed(WebSocketClosed),
    #[serde(other)]
    Unknown,
}

/// Room id of an inbound message, accepting `roomId` as an alias.
pub(crate) fn message_guild_id(value: &serde_json::Value) -> Option<&str> {
    value
        .get("guildId")
        .or_else(|| value.get("roomId"))
        .and_then(|v| v.as_str())
}
