//! Test doubles: a recording gateway, a fixed latency source, and helpers
//! that stand up nodes whose transport is an in-memory channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shoal_common::{Result, ShoalError};
use shoal_config::{NodeOptions, RegistryOptions};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::gateway::{VoiceGateway, VoiceServerFragment, VoiceStateFragment, VoiceStateRequest};
use crate::link::JoinOptions;
use crate::node::{NodeConnection, NodeSignal};
use crate::player::{Player, PlayerEvent};
use crate::rest::{LatencySource, NodeRest};

pub(crate) const CLIENT_ID: &str = "100";
pub(crate) const ENDPOINT: &str = "us-east1.example.media:443";

pub(crate) struct FakeGateway {
    requests: Mutex<Vec<VoiceStateRequest>>,
    latency: Duration,
}

impl FakeGateway {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub(crate) fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            latency,
        })
    }

    pub(crate) fn requests(&self) -> Vec<VoiceStateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn update_voice_state(&self, request: VoiceStateRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    fn shard_id(&self, _guild_id: &str) -> u64 {
        0
    }

    fn shard_latency(&self, _shard_id: u64) -> Duration {
        self.latency
    }
}

pub(crate) struct FixedLatency {
    latency: Duration,
    fail: AtomicBool,
}

impl FixedLatency {
    pub(crate) fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            fail: AtomicBool::new(false),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        let source = Self::new(Duration::ZERO);
        source.fail.store(true, Ordering::SeqCst);
        source
    }
}

#[async_trait]
impl LatencySource for FixedLatency {
    async fn latency(&self) -> Result<Duration> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ShoalError::Rest("ping refused".into()))
        } else {
            Ok(self.latency)
        }
    }
}

pub(crate) fn test_options() -> RegistryOptions {
    RegistryOptions {
        voice_connection_timeout_ms: 2_000,
        reconnect_interval_ms: 60_000,
        ..RegistryOptions::default()
    }
}

pub(crate) fn node_options(name: &str, group: Option<&str>) -> NodeOptions {
    let options = NodeOptions::new(name, "localhost", 2333, "youshallnotpass");
    match group {
        Some(group) => options.with_group(group),
        None => options,
    }
}

pub(crate) fn build_node(
    name: &str,
    group: Option<&str>,
    options: Arc<RegistryOptions>,
    gateway: Arc<dyn VoiceGateway>,
    signals: mpsc::UnboundedSender<NodeSignal>,
    ping_source: Arc<dyn LatencySource>,
) -> Arc<NodeConnection> {
    let node = node_options(name, group);
    let rest = NodeRest::new(
        node.rest_url(),
        node.auth.clone(),
        options.user_agent.clone(),
        options.rest_timeout(),
    );
    NodeConnection::with_latency_source(&node, options, gateway, signals, rest, ping_source)
}

/// Drive a node through its open sequence over an in-memory transport.
pub(crate) async fn open_node(node: &Arc<NodeConnection>) -> mpsc::UnboundedReceiver<WsMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    node.begin_connecting().await.unwrap();
    node.attach_transport(tx).await;
    node.on_open().await;
    rx
}

pub(crate) struct Harness {
    pub node: Arc<NodeConnection>,
    pub frames: mpsc::UnboundedReceiver<WsMessage>,
    pub signals: mpsc::UnboundedReceiver<NodeSignal>,
    pub gateway: Arc<FakeGateway>,
}

pub(crate) async fn connected_node(name: &str, options: RegistryOptions) -> Harness {
    connected_node_with(name, options, FakeGateway::new()).await
}

pub(crate) async fn connected_node_with(
    name: &str,
    options: RegistryOptions,
    gateway: Arc<FakeGateway>,
) -> Harness {
    let (signal_tx, signals) = mpsc::unbounded_channel();
    let node = build_node(
        name,
        None,
        Arc::new(options),
        gateway.clone(),
        signal_tx,
        FixedLatency::new(Duration::from_millis(10)),
    );
    let frames = open_node(&node).await;
    Harness {
        node,
        frames,
        signals,
        gateway,
    }
}

/// Outbound text frames queued so far, parsed as JSON.
pub(crate) fn drain_json(frames: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(message) = frames.try_recv() {
        if let WsMessage::Text(text) = message {
            out.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    out
}

pub(crate) fn state_fragment(guild_id: &str, channel_id: Option<&str>, session_id: &str) -> VoiceStateFragment {
    VoiceStateFragment {
        guild_id: guild_id.into(),
        user_id: CLIENT_ID.into(),
        channel_id: channel_id.map(str::to_string),
        session_id: session_id.into(),
        self_mute: false,
        self_deaf: false,
    }
}

pub(crate) fn server_fragment(guild_id: &str, endpoint: &str) -> VoiceServerFragment {
    VoiceServerFragment {
        guild_id: guild_id.into(),
        token: "token".into(),
        endpoint: Some(endpoint.into()),
    }
}

/// Join a room on `node`, feeding the handshake fragments once the link
/// is waiting for them.
pub(crate) async fn join_player(node: &Arc<NodeConnection>, guild_id: &str, channel_id: &str) -> Arc<Player> {
    let join = tokio::spawn({
        let node = Arc::clone(node);
        let options = JoinOptions::new(guild_id, channel_id);
        async move { node.join_voice_channel(options).await }
    });

    let player = wait_for_handshake(node, guild_id).await;
    player
        .link()
        .handle_state_update(state_fragment(guild_id, Some(channel_id), "session-1"))
        .await;
    player
        .link()
        .handle_server_update(server_fragment(guild_id, ENDPOINT))
        .await;

    join.await.unwrap().unwrap()
}

/// Wait until `guild_id` is registered on `node` and its link is waiting
/// for fragments.
pub(crate) async fn wait_for_handshake(node: &Arc<NodeConnection>, guild_id: &str) -> Arc<Player> {
    for _ in 0..500 {
        if let Some(player) = node.get_player(guild_id).await {
            if player.link().state() == shoal_common::ConnectionState::Connecting {
                return player;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("player for {guild_id} never started its handshake");
}

pub(crate) async fn next_event(events: &mut broadcast::Receiver<PlayerEvent>) -> PlayerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a player event")
        .expect("player event channel closed")
}
