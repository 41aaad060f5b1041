//! A gateway stand-in for running without a platform connection.

use std::time::Duration;

use async_trait::async_trait;
use shoal_common::Result;
use shoal_node::gateway::shard_for_guild;
use shoal_node::{VoiceGateway, VoiceStateRequest};
use tracing::info;

/// Logs the voice state payloads it would have sent on the platform
/// gateway. Rooms never complete their handshake through it.
pub struct LoggingGateway {
    shard_count: u64,
}

impl LoggingGateway {
    pub fn new(shard_count: u64) -> Self {
        Self { shard_count }
    }
}

#[async_trait]
impl VoiceGateway for LoggingGateway {
    async fn update_voice_state(&self, request: VoiceStateRequest) -> Result<()> {
        info!(
            guild = %request.guild_id,
            shard = request.shard_id,
            payload = %request.to_payload(),
            "Voice state update"
        );
        Ok(())
    }

    fn shard_id(&self, guild_id: &str) -> u64 {
        shard_for_guild(guild_id, self.shard_count)
    }

    fn shard_latency(&self, _shard_id: u64) -> Duration {
        Duration::ZERO
    }
}
