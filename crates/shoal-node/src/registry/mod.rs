//! The node pool.
//!
//! `NodeRegistry` owns every `NodeConnection`, picks the least loaded node
//! for new rooms, routes platform voice fragments to the room they belong
//! to, and applies the reconnect and failover policy when nodes go away.
//!
//! The registry is a cheap handle; clones share one pool. It must be
//! created inside a tokio runtime.

mod events;
mod failover;

use std::sync::Arc;

use shoal_common::{ConnectionState, InstanceId, Result, ShoalError};
use shoal_config::validation::validate_node;
use shoal_config::{NodeOptions, RegistryOptions};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info};

use crate::gateway::{VoiceGateway, VoiceServerFragment, VoiceStateFragment};
use crate::link::JoinOptions;
use crate::node::{NodeConnection, NodeSignal};
use crate::player::Player;

pub use events::RegistryEvent;

const EVENT_CAPACITY: usize = 256;

pub(crate) struct RegistryInner {
    options: Arc<RegistryOptions>,
    gateway: Arc<dyn VoiceGateway>,
    client_id: RwLock<Option<String>>,
    /// Registration order doubles as the selection tie-breaker.
    nodes: RwLock<Vec<Arc<NodeConnection>>>,
    events: broadcast::Sender<RegistryEvent>,
    signal_tx: mpsc::UnboundedSender<NodeSignal>,
}

#[derive(Clone)]
pub struct NodeRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl NodeRegistry {
    pub fn new(options: RegistryOptions, gateway: Arc<dyn VoiceGateway>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RegistryInner {
            options: Arc::new(options),
            gateway,
            client_id: RwLock::new(None),
            nodes: RwLock::new(Vec::new()),
            events,
            signal_tx,
        });
        tokio::spawn(failover::signal_loop(Arc::downgrade(&inner), signal_rx));
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.inner.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: RegistryEvent) {
        let _ = self.inner.events.send(event);
    }

    pub async fn client_id(&self) -> Option<String> {
        self.inner.client_id.read().await.clone()
    }

    /// Record the client identity and register the initial nodes.
    pub async fn init(&self, client_id: impl Into<String>, nodes: Vec<NodeOptions>) -> Result<()> {
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(ShoalError::Configuration("client id must not be empty".into()));
        }
        *self.inner.client_id.write().await = Some(client_id);
        info!(nodes = nodes.len(), "Initializing node registry");
        for node in nodes {
            self.add_node(node).await?;
        }
        Ok(())
    }

    // -- membership ---------------------------------------------------------

    /// Register a node and start connecting to it.
    pub async fn add_node(&self, options: NodeOptions) -> Result<Arc<NodeConnection>> {
        let Some(client_id) = self.client_id().await else {
            return Err(ShoalError::Configuration(
                "client id is not set; initialize the registry first".into(),
            ));
        };
        validate_node(&options).map_err(|e| ShoalError::Configuration(e.to_string()))?;

        let node = NodeConnection::new(
            &options,
            Arc::clone(&self.inner.options),
            Arc::clone(&self.inner.gateway),
            self.inner.signal_tx.clone(),
        );
        self.insert_node(Arc::clone(&node)).await?;

        // Nothing to resume on the first connect.
        if let Err(e) = node.connect(&client_id, false).await {
            self.detach(node.id()).await;
            return Err(e);
        }
        info!(node = %node.name(), group = node.group().unwrap_or("-"), "Node added");
        Ok(node)
    }

    /// Add an already built node, rejecting duplicate names.
    pub(crate) async fn insert_node(&self, node: Arc<NodeConnection>) -> Result<()> {
        let mut nodes = self.inner.nodes.write().await;
        if nodes.iter().any(|existing| existing.name() == node.name()) {
            return Err(ShoalError::Configuration(format!(
                "node '{}' is already registered",
                node.name()
            )));
        }
        nodes.push(node);
        Ok(())
    }

    async fn detach(&self, id: &InstanceId) -> Option<Arc<NodeConnection>> {
        let mut nodes = self.inner.nodes.write().await;
        let index = nodes.iter().position(|node| node.id() == id)?;
        Some(nodes.remove(index))
    }

    /// Remove a node for good: its rooms are moved or failed and its
    /// socket is closed.
    pub async fn remove_node(&self, name: &str, reason: &str) -> Result<()> {
        let node = {
            let mut nodes = self.inner.nodes.write().await;
            let Some(index) = nodes.iter().position(|node| node.name() == name) else {
                return Err(ShoalError::Configuration(format!(
                    "node '{name}' is not registered"
                )));
            };
            nodes.remove(index)
        };

        if node.state().await != ConnectionState::Disconnected {
            node.set_state(ConnectionState::Disconnecting).await;
        }
        self.cleanup(&node, false).await;
        node.close(1000, reason).await;

        info!(node = %name, reason, "Node removed");
        self.emit(RegistryEvent::Disconnected {
            name: name.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub async fn nodes(&self) -> Vec<Arc<NodeConnection>> {
        self.inner.nodes.read().await.clone()
    }

    pub(crate) async fn node_by_id(&self, id: &InstanceId) -> Option<Arc<NodeConnection>> {
        self.inner
            .nodes
            .read()
            .await
            .iter()
            .find(|node| node.id() == id)
            .cloned()
    }

    /// A specific connected node.
    pub async fn get_node(&self, name: &str) -> Result<Arc<NodeConnection>> {
        let node = self
            .inner
            .nodes
            .read()
            .await
            .iter()
            .find(|node| node.name() == name)
            .cloned()
            .ok_or_else(|| ShoalError::Configuration(format!("node '{name}' is not registered")))?;
        if node.state().await != ConnectionState::Connected {
            return Err(ShoalError::NodeDisconnected(name.to_string()));
        }
        Ok(node)
    }

    // -- selection ----------------------------------------------------------

    /// Least loaded connected node, optionally restricted to `groups`.
    ///
    /// Ties go to the node registered first.
    pub async fn select_node(&self, groups: Option<&[String]>) -> Result<Arc<NodeConnection>> {
        let nodes = self.nodes().await;
        let mut best: Option<(i64, Arc<NodeConnection>)> = None;
        for node in nodes {
            if node.state().await != ConnectionState::Connected {
                continue;
            }
            if let Some(groups) = groups {
                let in_group = node
                    .group()
                    .is_some_and(|group| groups.iter().any(|wanted| wanted == group));
                if !in_group {
                    continue;
                }
            }
            let penalty = node.penalties().await;
            if best.as_ref().map_or(true, |(lowest, _)| penalty < *lowest) {
                best = Some((penalty, node));
            }
        }
        best.map(|(_, node)| node).ok_or(ShoalError::NodeExhausted)
    }

    // -- rooms --------------------------------------------------------------

    pub async fn get_player(&self, guild_id: &str) -> Option<Arc<Player>> {
        for node in self.nodes().await {
            if let Some(player) = node.get_player(guild_id).await {
                return Some(player);
            }
        }
        None
    }

    pub async fn players(&self) -> Vec<Arc<Player>> {
        let mut players = Vec::new();
        for node in self.nodes().await {
            players.extend(node.players().await);
        }
        players
    }

    pub async fn total_players(&self) -> usize {
        let mut total = 0;
        for node in self.nodes().await {
            total += node.player_count().await;
        }
        total
    }

    /// Join a voice channel on the best node, or on the node already
    /// hosting the room.
    pub async fn join(&self, options: JoinOptions, groups: Option<&[String]>) -> Result<Arc<Player>> {
        let node = match self.get_player(&options.guild_id).await {
            Some(existing) => existing.node().await,
            None => self.select_node(groups).await?,
        };
        node.join_voice_channel(options).await
    }

    // -- platform events ----------------------------------------------------

    /// Route a voice state fragment. Fragments for other users are ignored.
    pub async fn handle_voice_state(&self, fragment: VoiceStateFragment) {
        let client_id = self.client_id().await;
        if client_id.as_deref() != Some(fragment.user_id.as_str()) {
            return;
        }
        match self.get_player(&fragment.guild_id).await {
            Some(player) => player.link().handle_state_update(fragment).await,
            None => debug!(guild = %fragment.guild_id, "Voice state for unknown room"),
        }
    }

    pub async fn handle_voice_server(&self, fragment: VoiceServerFragment) {
        match self.get_player(&fragment.guild_id).await {
            Some(player) => player.link().handle_server_update(fragment).await,
            None => debug!(guild = %fragment.guild_id, "Voice server for unknown room"),
        }
    }

    /// Route a raw platform dispatch (`{"t": ..., "d": {...}}`). Anything
    /// other than the two voice events is ignored.
    pub async fn handle_raw(&self, packet: &serde_json::Value) -> Result<()> {
        let kind = packet.get("t").and_then(|t| t.as_str());
        let data = packet.get("d").cloned().unwrap_or_default();
        match kind {
            Some("VOICE_STATE_UPDATE") => {
                let fragment: VoiceStateFragment = serde_json::from_value(data)?;
                self.handle_voice_state(fragment).await;
            }
            Some("VOICE_SERVER_UPDATE") => {
                let fragment: VoiceServerFragment = serde_json::from_value(data)?;
                self.handle_voice_server(fragment).await;
            }
            _ => {}
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn signal_sender(&self) -> mpsc::UnboundedSender<NodeSignal> {
        self.inner.signal_tx.clone()
    }

    #[cfg(test)]
    pub(crate) fn gateway(&self) -> Arc<dyn VoiceGateway> {
        Arc::clone(&self.inner.gateway)
    }

    #[cfg(test)]
    pub(crate) fn shared_options(&self) -> Arc<RegistryOptions> {
        Arc::clone(&self.inner.options)
    }
}

#[cfg(test)]
mod tests;
