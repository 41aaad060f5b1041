//! Inbound room messages from the hosting node.

use std::sync::Arc;
use std::time::Duration;

use shoal_common::{InstanceId, Result};
use tracing::{debug, info};

use super::{Player, PlayerEvent};
use crate::protocol::{PlayerUpdateMessage, TrackEnd, TrackEndReason, TrackEvent, WebSocketClosed};

/// Grace period before reporting a closed voice socket, so a pending
/// gateway move has time to arrive first.
pub fn bridge_timeout(node_ping: Duration, gateway_ping: Duration) -> Duration {
    if node_ping < gateway_ping {
        gateway_ping + node_ping
    } else {
        Duration::ZERO
    }
}

impl Player {
    /// Apply one message from the node identified by `from`.
    pub(crate) async fn handle_message(
        self: &Arc<Self>,
        from: &InstanceId,
        op: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        match op {
            "playerUpdate" => {
                let update: PlayerUpdateMessage = serde_json::from_value(value)?;
                if let Some(position) = update.state.position {
                    self.state.write().await.position = position;
                }
                self.emit(PlayerEvent::Update(update.state));
            }
            "event" => {
                let kind = value
                    .get("type")
                    .and_then(|kind| kind.as_str())
                    .unwrap_or_default()
                    .to_string();
                let event: TrackEvent = serde_json::from_value(value)?;
                self.handle_event(event, &kind, from).await;
            }
            _ => debug!(guild = %self.guild_id, op, "Unknown player message op"),
        }
        Ok(())
    }

    async fn handle_event(self: &Arc<Self>, event: TrackEvent, kind: &str, from: &InstanceId) {
        match event {
            TrackEvent::Start(start) => {
                self.state.write().await.position = 0;
                self.emit(PlayerEvent::Start(start));
            }
            TrackEvent::End(end) => {
                self.finish_track(&end).await;
                self.emit(PlayerEvent::End(end));
            }
            TrackEvent::Stuck(stuck) => {
                debug!(guild = %self.guild_id, threshold_ms = stuck.threshold_ms, "Track stuck");
                let end = TrackEnd {
                    track: stuck.track,
                    reason: TrackEndReason::Stuck,
                };
                self.finish_track(&end).await;
                self.emit(PlayerEvent::End(end));
            }
            TrackEvent::Exception(exception) => {
                self.emit(PlayerEvent::Exception(exception));
            }
            TrackEvent::WebSocketClosed(closed) => self.voice_closed(closed, from.clone()).await,
            TrackEvent::Unknown => {
                debug!(guild = %self.guild_id, kind, "Unknown player event type");
            }
        }
    }

    /// Reset the position, and drop the track unless it was replaced by a
    /// newer one.
    async fn finish_track(&self, end: &TrackEnd) {
        let mut state = self.state.write().await;
        state.position = 0;
        let same_track = match (&end.track, &state.track) {
            (Some(ended), Some(current)) => ended == current,
            (None, _) => true,
            (Some(_), None) => false,
        };
        if end.reason != TrackEndReason::Replaced && same_track {
            state.track = None;
        }
    }

    async fn voice_closed(self: &Arc<Self>, closed: WebSocketClosed, from: InstanceId) {
        if self.link.is_reconnecting().await {
            debug!(guild = %self.guild_id, code = closed.code, "Ignoring voice close while reconnecting");
            return;
        }

        let node_ping = self.link.node().await.ping().await;
        let wait = bridge_timeout(node_ping, self.link.shard_latency());
        let player = Arc::clone(self);
        tokio::spawn(async move { player.report_closed(closed, wait, &from).await });
    }

    async fn report_closed(&self, closed: WebSocketClosed, wait: Duration, from: &InstanceId) {
        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.link.interrupted() => {}
            }
        }

        if self.link.take_moved(from).await {
            return;
        }
        if self.link.is_reconnecting().await || self.link.is_destroyed().await {
            debug!(guild = %self.guild_id, code = closed.code, "Dropping voice close for a link in transition");
            return;
        }

        info!(
            guild = %self.guild_id,
            code = closed.code,
            reason = %closed.reason,
            by_remote = closed.by_remote,
            "Voice websocket closed"
        );
        self.emit(PlayerEvent::Closed(closed));
    }
}
