//! One persistent connection to one backend node.
//!
//! A `NodeConnection` owns the node's connection state machine, its load
//! snapshot and latency window, and the table of players currently hosted
//! on it. Lifecycle changes are reported to the registry as `NodeSignal`s.

mod socket;
pub mod stats;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shoal_common::{mask_secret, ConnectionState, InstanceId, Result, ShoalError};
use shoal_config::{NodeOptions, RegistryOptions};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::gateway::VoiceGateway;
use crate::link::JoinOptions;
use crate::player::Player;
use crate::protocol::{message_guild_id, Command, NodeStats};
use crate::rest::{LatencySource, NodeRest};

pub use stats::{penalty, PingWindow, PING_WINDOW};

/// Lifecycle notifications from a node to the registry.
///
/// Every signal carries the node's instance id so that signals from a
/// removed incarnation can be discarded.
#[derive(Debug, Clone)]
pub enum NodeSignal {
    Ready {
        id: InstanceId,
        name: String,
        resumed: bool,
    },
    Error {
        id: InstanceId,
        name: String,
        error: ShoalError,
    },
    Closed {
        id: InstanceId,
        name: String,
        code: u16,
        reason: String,
    },
}

impl NodeSignal {
    pub fn id(&self) -> &InstanceId {
        match self {
            NodeSignal::Ready { id, .. }
            | NodeSignal::Error { id, .. }
            | NodeSignal::Closed { id, .. } => id,
        }
    }
}

/// A connection to one node.
pub struct NodeConnection {
    id: InstanceId,
    name: String,
    group: Option<String>,
    url: String,
    auth: String,
    options: Arc<RegistryOptions>,
    rest: NodeRest,
    ping_source: Arc<dyn LatencySource>,
    gateway: Arc<dyn VoiceGateway>,
    state: RwLock<ConnectionState>,
    stats: RwLock<NodeStats>,
    pings: RwLock<PingWindow>,
    transport: RwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    players: RwLock<HashMap<String, Arc<Player>>>,
    reconnect_attempts: AtomicU32,
    resumed: AtomicBool,
    signals: mpsc::UnboundedSender<NodeSignal>,
}

impl std::fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("url", &self.url)
            .finish()
    }
}

impl NodeConnection {
    /// Build a node whose latency source is its own REST client.
    pub(crate) fn new(
        node: &NodeOptions,
        options: Arc<RegistryOptions>,
        gateway: Arc<dyn VoiceGateway>,
        signals: mpsc::UnboundedSender<NodeSignal>,
    ) -> Arc<Self> {
        let rest = NodeRest::new(
            node.rest_url(),
            node.auth.clone(),
            options.user_agent.clone(),
            options.rest_timeout(),
        );
        let ping_source: Arc<dyn LatencySource> = Arc::new(rest.clone());
        Self::with_latency_source(node, options, gateway, signals, rest, ping_source)
    }

    pub(crate) fn with_latency_source(
        node: &NodeOptions,
        options: Arc<RegistryOptions>,
        gateway: Arc<dyn VoiceGateway>,
        signals: mpsc::UnboundedSender<NodeSignal>,
        rest: NodeRest,
        ping_source: Arc<dyn LatencySource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: InstanceId::new(),
            name: node.name.clone(),
            group: node.group.clone(),
            url: node.ws_url(),
            auth: node.auth.clone(),
            options,
            rest,
            ping_source,
            gateway,
            state: RwLock::new(ConnectionState::Disconnected),
            stats: RwLock::new(NodeStats::default()),
            pings: RwLock::new(PingWindow::new()),
            transport: RwLock::new(None),
            players: RwLock::new(HashMap::new()),
            reconnect_attempts: AtomicU32::new(0),
            resumed: AtomicBool::new(false),
            signals,
        })
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// REST side-channel of this node.
    pub fn rest(&self) -> &NodeRest {
        &self.rest
    }

    pub(crate) fn options(&self) -> &Arc<RegistryOptions> {
        &self.options
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn VoiceGateway> {
        &self.gateway
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn stats(&self) -> NodeStats {
        self.stats.read().await.clone()
    }

    /// Load score from the latest stats; lower is better.
    pub async fn penalties(&self) -> i64 {
        penalty(&*self.stats.read().await)
    }

    /// Average of the retained latency samples.
    pub async fn ping(&self) -> Duration {
        self.pings.read().await.average()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_attempts(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the server resumed the previous session on the last connect.
    pub fn resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    // -- state machine ------------------------------------------------------

    /// Move to `next` if the lifecycle allows it.
    pub(crate) async fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write().await;
        if *state == next {
            return true;
        }
        if !state.can_transition_to(next) {
            warn!(node = %self.name, from = %*state, to = %next, "Rejected node state transition");
            return false;
        }
        debug!(node = %self.name, from = %*state, to = %next, "Node state changed");
        *state = next;
        true
    }

    /// Enter CONNECTING; only legal from DISCONNECTED.
    pub(crate) async fn begin_connecting(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != ConnectionState::Disconnected {
            return Err(ShoalError::Configuration(format!(
                "node '{}' is {} and cannot connect",
                self.name, *state
            )));
        }
        *state = ConnectionState::Connecting;
        Ok(())
    }

    /// Open the websocket in a background task.
    ///
    /// `resume` sends the configured resume key so the server can restore
    /// the previous session.
    pub async fn connect(self: &Arc<Self>, client_id: &str, resume: bool) -> Result<()> {
        self.begin_connecting().await?;

        let resume_key = if resume {
            self.options.resume_key.as_deref()
        } else {
            None
        };
        let request = match socket::build_request(
            &self.url,
            &self.auth,
            client_id,
            &self.options.user_agent,
            resume_key,
        ) {
            Ok(request) => request,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected).await;
                return Err(e);
            }
        };

        info!(
            node = %self.name,
            url = %self.url,
            auth = %mask_secret(&self.auth),
            user_id = client_id,
            resume = resume_key.is_some(),
            "Connecting to node"
        );
        tokio::spawn(socket::run_socket(Arc::clone(self), request));
        Ok(())
    }

    pub(crate) async fn attach_transport(&self, transport: mpsc::UnboundedSender<WsMessage>) {
        *self.transport.write().await = Some(transport);
    }

    pub(crate) fn set_resumed(&self, resumed: bool) {
        self.resumed.store(resumed, Ordering::SeqCst);
    }

    /// Open sequence: configure resuming, measure latency, become CONNECTED.
    pub(crate) async fn on_open(&self) {
        if let Some(key) = &self.options.resume_key {
            debug!(
                node = %self.name,
                key = %mask_secret(key),
                timeout_secs = self.options.resume_timeout_secs,
                "Configuring resuming"
            );
            let command = Command::ConfigureResuming {
                key: key.clone(),
                timeout: self.options.resume_timeout_secs,
            };
            if let Err(e) = self.send(&command).await {
                self.fail_open(e).await;
                return;
            }
        }

        let started = Instant::now();
        match self.ping_source.latency().await {
            Ok(sample) => self.pings.write().await.record(started, sample),
            Err(e) => {
                self.fail_open(e).await;
                return;
            }
        }

        self.reconnect_attempts.store(0, Ordering::SeqCst);
        if !self.set_state(ConnectionState::Connected).await {
            return;
        }

        let resumed = self.resumed();
        let ping_ms = self.ping().await.as_millis() as u64;
        info!(
            node = %self.name,
            ping_ms,
            resumed,
            "Node ready"
        );
        self.signal(NodeSignal::Ready {
            id: self.id.clone(),
            name: self.name.clone(),
            resumed,
        });
    }

    async fn fail_open(&self, error: ShoalError) {
        warn!(node = %self.name, error = %error, "Node open sequence failed");
        self.report(error);
        self.close(1011, "Failed to configure the session").await;
    }

    /// The socket could not be established at all.
    pub(crate) async fn fail_connect(&self, error: ShoalError) {
        warn!(node = %self.name, error = %error, "Failed to connect to node");
        let reason = error.to_string();
        self.report(error);
        self.on_close(1006, &reason).await;
    }

    pub(crate) async fn on_transport_error(&self, error: ShoalError) {
        warn!(node = %self.name, error = %error, "Node websocket error");
        self.report(error);
        self.close(1011, "Reconnecting the websocket due to an error")
            .await;
    }

    /// Transport is gone: detach it and tell the registry.
    pub(crate) async fn on_close(&self, code: u16, reason: &str) {
        self.transport.write().await.take();
        self.set_state(ConnectionState::Disconnected).await;
        info!(node = %self.name, code, reason, "Node websocket closed");
        self.signal(NodeSignal::Closed {
            id: self.id.clone(),
            name: self.name.clone(),
            code,
            reason: reason.to_string(),
        });
    }

    /// Send a close frame and detach the transport. Later commands fail
    /// until the next connect.
    pub async fn close(&self, code: u16, reason: &str) {
        let transport = self.transport.write().await.take();
        if let Some(tx) = transport {
            debug!(node = %self.name, code, reason, "Closing node websocket");
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            let _ = tx.send(WsMessage::Close(Some(frame)));
        }
    }

    fn signal(&self, signal: NodeSignal) {
        if self.signals.send(signal).is_err() {
            debug!(node = %self.name, "Registry is gone, dropping node signal");
        }
    }

    /// Raise a non-fatal error to the registry.
    pub(crate) fn report(&self, error: ShoalError) {
        self.signal(NodeSignal::Error {
            id: self.id.clone(),
            name: self.name.clone(),
            error,
        });
    }

    // -- outbound -----------------------------------------------------------

    /// Queue a command on the transport.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let payload = serde_json::to_string(command)?;
        let transport = self.transport.read().await;
        let Some(tx) = transport.as_ref() else {
            return Err(ShoalError::Transport(format!(
                "node '{}' is not connected",
                self.name
            )));
        };
        tx.send(WsMessage::Text(payload.into())).map_err(|_| {
            ShoalError::Transport(format!("node '{}' transport is closed", self.name))
        })?;
        debug!(
            node = %self.name,
            op = command.op(),
            guild = command.guild_id().unwrap_or("-"),
            "Command sent"
        );
        Ok(())
    }

    // -- inbound ------------------------------------------------------------

    /// Dispatch one inbound text frame.
    pub(crate) async fn handle_message(self: &Arc<Self>, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                let error = ShoalError::from(e);
                warn!(node = %self.name, error = %error, "Malformed node message");
                self.report(error);
                return;
            }
        };

        let op = value
            .get("op")
            .and_then(|op| op.as_str())
            .unwrap_or_default()
            .to_string();
        debug!(node = %self.name, op = %op, "Node message received");

        if op == "stats" {
            match serde_json::from_value::<NodeStats>(value) {
                Ok(stats) => {
                    *self.stats.write().await = stats;
                    self.spawn_ping();
                }
                Err(e) => self.report(e.into()),
            }
            return;
        }

        let Some(guild_id) = message_guild_id(&value).map(str::to_owned) else {
            debug!(node = %self.name, op = %op, "Dropping message without a room id");
            return;
        };
        let Some(player) = self.get_player(&guild_id).await else {
            debug!(node = %self.name, guild = %guild_id, op = %op, "Dropping message for unhosted room");
            return;
        };
        if let Err(e) = player.handle_message(&self.id, &op, value).await {
            warn!(node = %self.name, guild = %guild_id, error = %e, "Player failed to handle message");
            self.report(e);
        }
    }

    fn spawn_ping(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let started = Instant::now();
        tokio::spawn(async move {
            match node.ping_source.latency().await {
                Ok(sample) => node.pings.write().await.record(started, sample),
                Err(e) => debug!(node = %node.name, error = %e, "Latency check failed"),
            }
        });
    }

    // -- room table ---------------------------------------------------------

    pub async fn get_player(&self, guild_id: &str) -> Option<Arc<Player>> {
        self.players.read().await.get(guild_id).cloned()
    }

    pub async fn players(&self) -> Vec<Arc<Player>> {
        self.players.read().await.values().cloned().collect()
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    pub(crate) async fn insert_player(&self, player: Arc<Player>) {
        self.players
            .write()
            .await
            .insert(player.guild_id().to_string(), player);
    }

    pub(crate) async fn remove_player(&self, guild_id: &str) -> Option<Arc<Player>> {
        self.players.write().await.remove(guild_id)
    }

    /// Remove `player` only if it is still the one registered for its room.
    async fn remove_player_if(&self, player: &Arc<Player>) {
        let mut players = self.players.write().await;
        if players
            .get(player.guild_id())
            .is_some_and(|current| Arc::ptr_eq(current, player))
        {
            players.remove(player.guild_id());
        }
    }

    // -- voice --------------------------------------------------------------

    /// Create a player for the room and run the voice handshake.
    ///
    /// An existing, fully connected player for the room is returned as is.
    pub async fn join_voice_channel(self: &Arc<Self>, options: JoinOptions) -> Result<Arc<Player>> {
        if options.guild_id.is_empty() || options.channel_id.is_empty() {
            return Err(ShoalError::Configuration(
                "guild id or channel id is not specified".into(),
            ));
        }
        if self.state().await != ConnectionState::Connected {
            return Err(ShoalError::Configuration(format!(
                "node '{}' is not yet ready",
                self.name
            )));
        }

        let player = {
            let mut players = self.players.write().await;
            if let Some(existing) = players.get(&options.guild_id) {
                let existing = Arc::clone(existing);
                drop(players);
                if existing.link().state() != ConnectionState::Connected {
                    return Err(ShoalError::Configuration(
                        "this player is not yet connected, please wait for it to connect".into(),
                    ));
                }
                return Ok(existing);
            }
            let player = Player::new(Arc::clone(self), options.guild_id.clone());
            players.insert(options.guild_id.clone(), Arc::clone(&player));
            player
        };

        info!(node = %self.name, guild = %options.guild_id, channel = %options.channel_id, "Joining voice channel");
        match player
            .connect(&options.channel_id, options.mute, options.deaf)
            .await
        {
            Ok(()) => Ok(player),
            Err(e) => {
                self.remove_player_if(&player).await;
                Err(e)
            }
        }
    }

    /// Disconnect and drop the room's player, if hosted here.
    pub async fn leave_voice_channel(&self, guild_id: &str) {
        if let Some(player) = self.get_player(guild_id).await {
            player.disconnect().await;
        }
    }
}
