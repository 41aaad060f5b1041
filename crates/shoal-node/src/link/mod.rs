//! Per-room voice handshake between the platform gateway and a node.
//!
//! The platform delivers two fragments for every voice session: a state
//! fragment (session id, channel) and a server fragment (token, endpoint).
//! Once both are present they are combined into one `voiceUpdate` command
//! for the node hosting the room. Combining consumes both, so a new server
//! fragment paired with an already-used state fragment does not resend.

use std::sync::Arc;
use std::time::Duration;

use shoal_common::{ConnectionState, InstanceId, Result, ShoalError};
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::gateway::{VoiceGateway, VoiceServerFragment, VoiceStateFragment, VoiceStateRequest};
use crate::node::NodeConnection;
use crate::player::{Player, PlayerEvent};
use crate::protocol::Command;

/// Parameters for joining a voice channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOptions {
    pub guild_id: String,
    pub channel_id: String,
    pub mute: bool,
    pub deaf: bool,
}

impl JoinOptions {
    pub fn new(guild_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            mute: false,
            deaf: false,
        }
    }
}

#[derive(Debug, Default)]
struct LinkState {
    session_id: Option<String>,
    channel_id: Option<String>,
    last_channel_id: Option<String>,
    region: Option<String>,
    mute: bool,
    deaf: bool,
    state_fragment: Option<VoiceStateFragment>,
    server_fragment: Option<VoiceServerFragment>,
    state_pending: bool,
    server_pending: bool,
    channel_moved: bool,
    /// Node whose next voice close belongs to a server or node move.
    moved_from: Option<InstanceId>,
    reconnecting: bool,
    destroyed: bool,
}

impl LinkState {
    /// Combine both fragments into a voice update, consuming them.
    fn take_update(&mut self, guild_id: &str) -> Option<Command> {
        if !(self.state_pending && self.server_pending) {
            return None;
        }
        let command = self.replay_update(guild_id)?;
        self.state_pending = false;
        self.server_pending = false;
        Some(command)
    }

    /// Voice update from the last fragments, whether consumed or not.
    fn replay_update(&self, guild_id: &str) -> Option<Command> {
        let session_id = self.session_id.clone()?;
        let server = self.server_fragment.clone()?;
        Some(Command::VoiceUpdate {
            guild_id: guild_id.to_string(),
            session_id,
            event: server,
        })
    }

    fn clear_fragments(&mut self) {
        self.state_fragment = None;
        self.server_fragment = None;
        self.state_pending = false;
        self.server_pending = false;
    }
}

/// Voice session state for one room.
pub struct VoiceLink {
    guild_id: String,
    shard_id: u64,
    gateway: Arc<dyn VoiceGateway>,
    node: RwLock<Arc<NodeConnection>>,
    status: watch::Sender<ConnectionState>,
    interrupt: Notify,
    inner: RwLock<LinkState>,
    events: broadcast::Sender<PlayerEvent>,
    timeout: Duration,
}

impl std::fmt::Debug for VoiceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceLink")
            .field("guild_id", &self.guild_id)
            .field("shard_id", &self.shard_id)
            .field("state", &self.state())
            .finish()
    }
}

impl VoiceLink {
    pub(crate) fn new(
        node: Arc<NodeConnection>,
        guild_id: String,
        events: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        let gateway = Arc::clone(node.gateway());
        let shard_id = gateway.shard_id(&guild_id);
        let timeout = node.options().voice_connection_timeout();
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            guild_id,
            shard_id,
            gateway,
            node: RwLock::new(node),
            status,
            interrupt: Notify::new(),
            inner: RwLock::new(LinkState::default()),
            events,
            timeout,
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    /// Node currently hosting the room.
    pub async fn node(&self) -> Arc<NodeConnection> {
        Arc::clone(&*self.node.read().await)
    }

    pub fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.read().await.session_id.clone()
    }

    pub async fn channel_id(&self) -> Option<String> {
        self.inner.read().await.channel_id.clone()
    }

    pub async fn last_channel_id(&self) -> Option<String> {
        self.inner.read().await.last_channel_id.clone()
    }

    pub async fn region(&self) -> Option<String> {
        self.inner.read().await.region.clone()
    }

    pub async fn is_reconnecting(&self) -> bool {
        self.inner.read().await.reconnecting
    }

    pub async fn is_destroyed(&self) -> bool {
        self.inner.read().await.destroyed
    }

    pub fn shard_latency(&self) -> Duration {
        self.gateway.shard_latency(self.shard_id)
    }

    /// Consume the move flags for a voice close reported by `reporter`.
    ///
    /// A server or node move only accounts for a close from the node the
    /// room was on when it moved. Any close clears both flags.
    pub(crate) async fn take_moved(&self, reporter: &InstanceId) -> bool {
        let mut inner = self.inner.write().await;
        let channel_moved = std::mem::take(&mut inner.channel_moved);
        let voice_moved = inner.moved_from.take().is_some_and(|from| &from == reporter);
        let moved = channel_moved || voice_moved;
        if moved {
            debug!(
                guild = %self.guild_id,
                channel_moved,
                voice_moved,
                "Channel or server move detected"
            );
        }
        moved
    }

    /// Resolves on the next move, disconnect or reconnect of this link.
    pub(crate) fn interrupted(&self) -> Notified<'_> {
        self.interrupt.notified()
    }

    fn set_status(&self, next: ConnectionState) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(guild = %self.guild_id, from = %*current, to = %next, "Voice link state changed");
            *current = next;
            true
        });
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    // -- handshake ----------------------------------------------------------

    /// Join `channel_id` and wait for the handshake to complete.
    pub async fn connect(&self, channel_id: &str, mute: bool, deaf: bool) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            if inner.destroyed {
                return Err(ShoalError::Configuration(format!(
                    "voice link for guild {} is destroyed",
                    self.guild_id
                )));
            }
            inner.mute = mute;
            inner.deaf = deaf;
        }

        self.set_status(ConnectionState::Connecting);
        let mut status = self.status.subscribe();

        let request = VoiceStateRequest::join(&self.guild_id, self.shard_id, channel_id, mute, deaf);
        if let Err(e) = self.gateway.update_voice_state(request).await {
            self.set_status(ConnectionState::Disconnected);
            return Err(e);
        }
        debug!(guild = %self.guild_id, channel = channel_id, "Waiting for voice handshake");

        let timeout = self.timeout;
        let reached = tokio::time::timeout(timeout, async {
            status
                .wait_for(|state| *state != ConnectionState::Connecting)
                .await
                .map(|state| *state)
        })
        .await;

        match reached {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(_) => Err(ShoalError::Transport(format!(
                "voice connection for guild {} closed before it was established",
                self.guild_id
            ))),
            Err(_elapsed) => {
                warn!(guild = %self.guild_id, timeout_ms = timeout.as_millis() as u64, "Voice handshake timed out");
                self.disconnect().await;
                Err(ShoalError::RendezvousTimeout(timeout))
            }
        }
    }

    /// Apply a voice state fragment for the client user.
    pub async fn handle_state_update(&self, fragment: VoiceStateFragment) {
        let mut inner = self.inner.write().await;

        let Some(channel_id) = fragment.channel_id.clone() else {
            if inner.reconnecting {
                debug!(guild = %self.guild_id, "Ignoring voice leave while reconnecting");
                return;
            }
            inner.last_channel_id = inner.channel_id.take();
            inner.state_fragment = None;
            inner.state_pending = false;
            drop(inner);
            debug!(guild = %self.guild_id, "Left voice channel");
            self.set_status(ConnectionState::Disconnected);
            return;
        };

        if !inner.reconnecting
            && inner
                .channel_id
                .as_deref()
                .is_some_and(|current| current != channel_id)
        {
            inner.channel_moved = true;
        }
        inner.last_channel_id = inner.channel_id.replace(channel_id);
        inner.session_id = Some(fragment.session_id.clone());
        inner.mute = fragment.self_mute;
        inner.deaf = fragment.self_deaf;
        inner.state_fragment = Some(fragment);
        inner.state_pending = true;

        let update = inner.take_update(&self.guild_id);
        drop(inner);
        if let Some(command) = update {
            self.send_update(command).await;
        }
    }

    /// Apply a voice server fragment.
    pub async fn handle_server_update(&self, fragment: VoiceServerFragment) {
        if fragment.endpoint.is_none() {
            debug!(guild = %self.guild_id, "Voice server has no endpoint yet");
            return;
        }

        let current = self.node().await.id().clone();
        let mut inner = self.inner.write().await;
        let region = fragment.region();
        if !inner.reconnecting && inner.region.is_some() && inner.region != region {
            inner.moved_from = Some(current);
        }
        inner.region = region;
        inner.server_fragment = Some(fragment);
        inner.server_pending = true;

        let update = inner.take_update(&self.guild_id);
        drop(inner);
        if let Some(command) = update {
            self.send_update(command).await;
        }
    }

    async fn send_update(&self, command: Command) {
        let node = self.node().await;
        match node.send(&command).await {
            Ok(()) => {
                info!(guild = %self.guild_id, node = %node.name(), "Voice update sent");
                self.set_status(ConnectionState::Connected);
            }
            Err(e) => {
                warn!(guild = %self.guild_id, node = %node.name(), error = %e, "Failed to send voice update");
                self.emit(PlayerEvent::Error(e));
                self.disconnect().await;
            }
        }
    }

    // -- teardown and recovery ----------------------------------------------

    /// Leave voice and drop the room from its node. Safe to call twice.
    pub async fn disconnect(&self) {
        {
            let mut inner = self.inner.write().await;
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.reconnecting = false;
            inner.last_channel_id = inner.channel_id.take();
            inner.clear_fragments();
        }
        self.set_status(ConnectionState::Disconnecting);
        self.interrupt.notify_waiters();

        let node = self.node().await;
        node.remove_player(&self.guild_id).await;
        let destroy = Command::Destroy {
            guild_id: self.guild_id.clone(),
        };
        if let Err(e) = node.send(&destroy).await {
            debug!(guild = %self.guild_id, node = %node.name(), error = %e, "Could not destroy remote player");
        }
        let leave = VoiceStateRequest::leave(&self.guild_id, self.shard_id);
        if let Err(e) = self.gateway.update_voice_state(leave).await {
            warn!(guild = %self.guild_id, error = %e, "Failed to send voice leave");
        }

        self.set_status(ConnectionState::Disconnected);
        info!(guild = %self.guild_id, node = %node.name(), "Voice link disconnected");
    }

    /// Move the room to `target`, replaying the current voice session there.
    ///
    /// Moving onto the node that already hosts the room only replays the
    /// session, for nodes that came back without resuming.
    pub async fn move_to_node(&self, player: &Arc<Player>, target: Arc<NodeConnection>) -> Result<()> {
        if target.state().await != ConnectionState::Connected {
            return Err(ShoalError::NodeDisconnected(target.name().to_string()));
        }

        let source = self.node().await;
        let same_node = Arc::ptr_eq(&source, &target);

        let replay = {
            let mut inner = self.inner.write().await;
            if inner.destroyed {
                return Err(ShoalError::Configuration(format!(
                    "voice link for guild {} is destroyed",
                    self.guild_id
                )));
            }
            let Some(command) = inner.replay_update(&self.guild_id) else {
                return Err(ShoalError::Configuration(format!(
                    "guild {} has no voice session to move",
                    self.guild_id
                )));
            };
            if !same_node {
                inner.moved_from = Some(source.id().clone());
            }
            command
        };

        if !same_node {
            source.remove_player(&self.guild_id).await;
            let destroy = Command::Destroy {
                guild_id: self.guild_id.clone(),
            };
            if let Err(e) = source.send(&destroy).await {
                debug!(guild = %self.guild_id, node = %source.name(), error = %e, "Could not destroy player on source node");
            }
            *self.node.write().await = Arc::clone(&target);
            target.insert_player(Arc::clone(player)).await;
        }
        self.interrupt.notify_waiters();

        target.send(&replay).await?;
        self.set_status(ConnectionState::Connected);
        info!(guild = %self.guild_id, from = %source.name(), to = %target.name(), "Voice link moved");
        Ok(())
    }

    /// Leave and rejoin, optionally into a different channel.
    ///
    /// Leave signals and close notifications are suppressed while this runs.
    pub async fn reconnect(&self, channel_id: Option<String>) -> Result<()> {
        let (channel_id, mute, deaf) = {
            let mut inner = self.inner.write().await;
            if inner.destroyed {
                return Err(ShoalError::Configuration(format!(
                    "voice link for guild {} is destroyed",
                    self.guild_id
                )));
            }
            let Some(channel_id) = channel_id.or_else(|| inner.channel_id.clone()) else {
                return Err(ShoalError::Configuration(format!(
                    "guild {} has no voice channel to reconnect to",
                    self.guild_id
                )));
            };
            inner.reconnecting = true;
            (channel_id, inner.mute, inner.deaf)
        };
        self.interrupt.notify_waiters();
        info!(guild = %self.guild_id, channel = %channel_id, "Reconnecting voice link");

        let result = async {
            let leave = VoiceStateRequest::leave(&self.guild_id, self.shard_id);
            self.gateway.update_voice_state(leave).await?;
            self.set_status(ConnectionState::Disconnected);
            self.connect(&channel_id, mute, deaf).await
        }
        .await;

        self.inner.write().await.reconnecting = false;
        result
    }
}
