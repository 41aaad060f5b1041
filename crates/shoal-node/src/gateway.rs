//! Seam to the host platform's gateway client.
//!
//! The gateway supplies the two voice handshake fragments and accepts
//! join/leave requests. Everything here uses the platform's own snake_case
//! field names.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shoal_common::Result;

/// Sink for voice join/leave requests, plus the shard bookkeeping the link
/// needs to address them.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Send a voice state update (join when `channel_id` is set, leave
    /// otherwise) on the shard that owns the room.
    async fn update_voice_state(&self, request: VoiceStateRequest) -> Result<()>;

    /// Shard responsible for `guild_id`.
    fn shard_id(&self, guild_id: &str) -> u64;

    /// Last measured heartbeat latency of `shard`.
    fn shard_latency(&self, shard_id: u64) -> Duration;
}

/// Standard shard routing: `(guild_id >> 22) % shard_count`.
///
/// Non-numeric ids land on shard 0.
pub fn shard_for_guild(guild_id: &str, shard_count: u64) -> u64 {
    if shard_count == 0 {
        return 0;
    }
    guild_id
        .parse::<u64>()
        .map(|id| (id >> 22) % shard_count)
        .unwrap_or(0)
}

/// A join or leave request for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateRequest {
    pub guild_id: String,
    pub shard_id: u64,
    /// `None` leaves the current channel.
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStateRequest {
    pub fn join(
        guild_id: impl Into<String>,
        shard_id: u64,
        channel_id: impl Into<String>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            shard_id,
            channel_id: Some(channel_id.into()),
            self_mute,
            self_deaf,
        }
    }

    pub fn leave(guild_id: impl Into<String>, shard_id: u64) -> Self {
        Self {
            guild_id: guild_id.into(),
            shard_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        }
    }

    pub fn is_leave(&self) -> bool {
        self.channel_id.is_none()
    }

    /// Render the op-4 gateway payload.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "op": 4,
            "d": {
                "guild_id": self.guild_id,
                "channel_id": self.channel_id,
                "self_mute": self.self_mute,
                "self_deaf": self.self_deaf,
            }
        })
    }
}

/// `VOICE_STATE_UPDATE` payload for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceStateFragment {
    pub guild_id: String,
    pub user_id: String,
    /// `None` means the user left voice.
    pub channel_id: Option<String>,
    pub session_id: String,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// `VOICE_SERVER_UPDATE` payload. Forwarded verbatim as the `event` of a
/// `voiceUpdate` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceServerFragment {
    pub guild_id: String,
    pub token: String,
    /// Absent while the platform is still allocating a voice server.
    pub endpoint: Option<String>,
}

impl VoiceServerFragment {
    /// Voice region derived from the endpoint host, e.g. `us-east` for
    /// `us-east123.example.media:443`.
    pub fn region(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?;
        let host = endpoint.split('.').next()?;
        let region: String = host.chars().filter(|c| !c.is_ascii_digit()).collect();
        let region = region.trim_end_matches(':').to_string();
        if region.is_empty() {
            None
        } else {
            Some(region)
        }
    }
}
