//! Reconnect and failover policy.

use std::sync::{Arc, Weak};

use shoal_common::{ConnectionState, ShoalError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{NodeRegistry, RegistryEvent, RegistryInner};
use crate::node::{NodeConnection, NodeSignal};
use crate::player::PlayerEvent;

/// Process node signals in order until the registry is dropped.
pub(super) async fn signal_loop(
    inner: Weak<RegistryInner>,
    mut signals: mpsc::UnboundedReceiver<NodeSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        NodeRegistry::from_inner(inner).handle_signal(signal).await;
    }
    debug!("Registry signal loop stopped");
}

impl NodeRegistry {
    pub(crate) async fn handle_signal(&self, signal: NodeSignal) {
        let Some(node) = self.node_by_id(signal.id()).await else {
            debug!(id = %signal.id(), "Discarding signal from a removed node");
            return;
        };

        match signal {
            NodeSignal::Ready { name, resumed, .. } => {
                self.emit(RegistryEvent::Ready { name, resumed });
                if !resumed && node.player_count().await > 0 {
                    info!(node = %node.name(), "Session was not resumed, recovering hosted rooms");
                    self.cleanup(&node, true).await;
                }
            }
            NodeSignal::Error { name, error, .. } => {
                self.emit(RegistryEvent::Error { name, error });
            }
            NodeSignal::Closed {
                name, code, reason, ..
            } => {
                self.emit(RegistryEvent::Close { name, code, reason });
                self.on_node_closed(node).await;
            }
        }
    }

    async fn on_node_closed(&self, node: Arc<NodeConnection>) {
        let options = Arc::clone(&self.inner.options);
        if node.reconnect_attempts() >= options.reconnect_tries {
            warn!(
                node = %node.name(),
                attempts = node.reconnect_attempts(),
                "Reconnect attempts exhausted, removing node"
            );
            if let Err(e) = self
                .remove_node(node.name(), "reconnect attempts exhausted")
                .await
            {
                debug!(node = %node.name(), error = %e, "Node was already removed");
            }
            return;
        }

        // A resumable session keeps its rooms on the server; leave them be.
        if !options.resumable() {
            self.cleanup(&node, false).await;
        }

        let attempt = node.increment_attempts();
        let delay = options.reconnect_interval();
        info!(
            node = %node.name(),
            attempt,
            tries = options.reconnect_tries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling node reconnect"
        );

        let registry = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = registry.upgrade() else {
                return;
            };
            let registry = NodeRegistry::from_inner(inner);
            if registry.node_by_id(node.id()).await.is_none() {
                return;
            }
            let Some(client_id) = registry.client_id().await else {
                return;
            };
            if let Err(e) = node.connect(&client_id, options.resumable()).await {
                warn!(node = %node.name(), error = %e, "Node reconnect failed");
            }
        });
    }

    /// Move every room off `node`, or fail it when that is not possible.
    ///
    /// With `allow_self` the node itself is a valid target, which replays
    /// each room's session on a node that lost it.
    pub(crate) async fn cleanup(&self, node: &Arc<NodeConnection>, allow_self: bool) {
        let players = node.players().await;
        if players.is_empty() {
            return;
        }
        let move_on_disconnect = self.inner.options.move_on_disconnect;

        for player in players {
            if move_on_disconnect {
                if let Some(target) = self.failover_target(node, allow_self).await {
                    if let Err(e) = player.migrate(target).await {
                        warn!(guild = %player.guild_id(), error = %e, "Failed to move player");
                        player.emit(PlayerEvent::Error(e));
                    }
                    continue;
                }
            }

            let message = if move_on_disconnect {
                format!("node '{}' disconnected; no nodes to move to", node.name())
            } else {
                format!("node '{}' disconnected; moving is disabled", node.name())
            };
            warn!(guild = %player.guild_id(), node = %node.name(), "Failing player on node loss");
            player.emit(PlayerEvent::NodeDisconnect(ShoalError::NodeDisconnected(message)));
            player.disconnect().await;
        }
    }

    /// Best connected node to take over rooms from `node`, preferring its
    /// own group.
    async fn failover_target(
        &self,
        node: &Arc<NodeConnection>,
        allow_self: bool,
    ) -> Option<Arc<NodeConnection>> {
        if allow_self && node.state().await == ConnectionState::Connected {
            return Some(Arc::clone(node));
        }

        let mut best: Option<(bool, i64, Arc<NodeConnection>)> = None;
        for candidate in self.nodes().await {
            if Arc::ptr_eq(&candidate, node)
                || candidate.state().await != ConnectionState::Connected
            {
                continue;
            }
            let same_group = node.group().is_some() && candidate.group() == node.group();
            let penalty = candidate.penalties().await;
            let better = match &best {
                None => true,
                Some((best_group, best_penalty, _)) => {
                    (same_group && !best_group)
                        || (same_group == *best_group && penalty < *best_penalty)
                }
            };
            if better {
                best = Some((same_group, penalty, candidate));
            }
        }
        best.map(|(_, _, candidate)| candidate)
    }
}
