use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shoal_common::{ConnectionState, ShoalError};
use shoal_config::{NodeOptions, RegistryOptions};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::*;
use crate::player::PlayerEvent;
use crate::testing::{
    build_node, drain_json, join_player, next_event, node_options, open_node, state_fragment,
    test_options, wait_for_handshake, FakeGateway, FixedLatency, CLIENT_ID, ENDPOINT,
};

async fn registry(options: RegistryOptions) -> (NodeRegistry, Arc<FakeGateway>) {
    let gateway = FakeGateway::new();
    let registry = NodeRegistry::new(options, gateway.clone());
    *registry.inner.client_id.write().await = Some(CLIENT_ID.to_string());
    (registry, gateway)
}

fn registered(registry: &NodeRegistry, name: &str, group: Option<&str>) -> Arc<NodeConnection> {
    build_node(
        name,
        group,
        registry.shared_options(),
        registry.gateway(),
        registry.signal_sender(),
        FixedLatency::new(Duration::from_millis(10)),
    )
}

async fn add_connected(
    registry: &NodeRegistry,
    name: &str,
    group: Option<&str>,
) -> (Arc<NodeConnection>, mpsc::UnboundedReceiver<WsMessage>) {
    let node = registered(registry, name, group);
    registry.insert_node(Arc::clone(&node)).await.unwrap();
    let mut events = registry.subscribe();
    let frames = open_node(&node).await;
    // Settle the ready signal before any rooms exist.
    wait_for_registry_event(&mut events, |e| {
        matches!(e, RegistryEvent::Ready { name: ready, .. } if ready == name)
    })
    .await;
    (node, frames)
}

async fn set_load(node: &Arc<NodeConnection>, players: u32) {
    let stats = json!({
        "op": "stats",
        "players": players,
        "playingPlayers": 0,
        "uptime": 1,
        "memory": {"free": 0, "used": 0, "allocated": 0, "reservable": 0},
        "cpu": {"cores": 1, "systemLoad": 0.0, "lavalinkLoad": 0.0}
    });
    node.handle_message(&stats.to_string()).await;
}

async fn wait_for_registry_event(
    events: &mut broadcast::Receiver<RegistryEvent>,
    matches: impl Fn(&RegistryEvent) -> bool,
) -> RegistryEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for a registry event")
}

async fn wait_until<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition never became true");
}

/// Accept upgrades on a loopback port and report the Resume-Key header of
/// every client handshake. Each socket is dropped right after upgrading.
async fn resume_key_recorder() -> (u16, mpsc::UnboundedReceiver<Option<String>>) {
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let record = move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                    let headers = request.headers();
                    if headers.contains_key("User-Id") {
                        let key = headers
                            .get("Resume-Key")
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_string);
                        let _ = tx.send(key);
                    }
                    Ok(response)
                };
                let _ = tokio_tungstenite::accept_hdr_async(stream, record).await;
            });
        }
    });
    (port, rx)
}

async fn next_handshake(keys: &mut mpsc::UnboundedReceiver<Option<String>>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), keys.recv())
        .await
        .expect("timed out waiting for a handshake")
        .expect("recorder stopped")
}

#[tokio::test]
async fn selects_least_loaded_connected_node() {
    let (registry, _gateway) = registry(test_options()).await;
    let (a, _fa) = add_connected(&registry, "a", None).await;
    let (b, _fb) = add_connected(&registry, "b", None).await;
    let c = registered(&registry, "c", None);
    registry.insert_node(Arc::clone(&c)).await.unwrap();
    set_load(&a, 5).await;
    set_load(&b, 2).await;
    set_load(&c, 1).await;

    let chosen = registry.select_node(None).await.unwrap();
    assert_eq!(chosen.name(), "b");
    assert_eq!(c.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn ties_go_to_the_first_registered() {
    let (registry, _gateway) = registry(test_options()).await;
    let (_a, _fa) = add_connected(&registry, "a", None).await;
    let (_b, _fb) = add_connected(&registry, "b", None).await;

    assert_eq!(registry.select_node(None).await.unwrap().name(), "a");
}

#[tokio::test]
async fn group_filter_and_exhaustion() {
    let (registry, _gateway) = registry(test_options()).await;
    let (eu, _f1) = add_connected(&registry, "eu-1", Some("eu")).await;
    let (_us, _f2) = add_connected(&registry, "us-1", Some("us")).await;
    set_load(&eu, 50).await;

    let groups = vec!["eu".to_string()];
    assert_eq!(registry.select_node(Some(&groups)).await.unwrap().name(), "eu-1");
    assert_eq!(registry.select_node(None).await.unwrap().name(), "us-1");

    let groups = vec!["asia".to_string()];
    assert!(matches!(
        registry.select_node(Some(&groups)).await,
        Err(ShoalError::NodeExhausted)
    ));

    let (empty, _gateway) = self::registry(test_options()).await;
    assert!(matches!(
        empty.select_node(None).await,
        Err(ShoalError::NodeExhausted)
    ));
}

#[tokio::test]
async fn add_node_requires_init() {
    let registry = NodeRegistry::new(test_options(), FakeGateway::new());
    let err = registry
        .add_node(node_options("main", None))
        .await
        .unwrap_err();
    assert!(matches!(err, ShoalError::Configuration(_)));

    let err = registry.init("", Vec::new()).await.unwrap_err();
    assert!(matches!(err, ShoalError::Configuration(_)));
}

#[tokio::test]
async fn duplicate_and_invalid_nodes_are_rejected() {
    let (registry, _gateway) = registry(test_options()).await;
    let (_a, _fa) = add_connected(&registry, "a", None).await;

    let duplicate = registered(&registry, "a", None);
    assert!(matches!(
        registry.insert_node(duplicate).await,
        Err(ShoalError::Configuration(_))
    ));

    let mut invalid = node_options("bad", None);
    invalid.auth.clear();
    assert!(matches!(
        registry.add_node(invalid).await,
        Err(ShoalError::Configuration(_))
    ));
    assert_eq!(registry.nodes().await.len(), 1);
}

#[tokio::test]
async fn get_node_requires_connected() {
    let (registry, _gateway) = registry(test_options()).await;
    let (_a, _fa) = add_connected(&registry, "a", None).await;
    let idle = registered(&registry, "idle", None);
    registry.insert_node(idle).await.unwrap();

    assert_eq!(registry.get_node("a").await.unwrap().name(), "a");
    assert!(matches!(
        registry.get_node("idle").await,
        Err(ShoalError::NodeDisconnected(_))
    ));
    assert!(matches!(
        registry.get_node("missing").await,
        Err(ShoalError::Configuration(_))
    ));
}

#[tokio::test]
async fn remove_node_fails_players_and_closes() {
    let (registry, _gateway) = registry(test_options()).await;
    let (node, mut frames) = add_connected(&registry, "a", None).await;
    let player = join_player(&node, "1", "2").await;
    drain_json(&mut frames);
    let mut player_events = player.subscribe();
    let mut events = registry.subscribe();

    assert!(matches!(
        registry.remove_node("missing", "x").await,
        Err(ShoalError::Configuration(_))
    ));
    registry.remove_node("a", "maintenance").await.unwrap();

    assert!(matches!(
        next_event(&mut player_events).await,
        PlayerEvent::NodeDisconnect(ShoalError::NodeDisconnected(_))
    ));
    assert!(player.link().is_destroyed().await);
    assert_eq!(node.state().await, ConnectionState::Disconnecting);
    assert!(registry.nodes().await.is_empty());

    let event = wait_for_registry_event(&mut events, |e| {
        matches!(e, RegistryEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(event.node_name(), "a");

    let mut close_code = None;
    while let Ok(message) = frames.try_recv() {
        if let WsMessage::Close(Some(frame)) = message {
            close_code = Some(u16::from(frame.code));
        }
    }
    assert_eq!(close_code, Some(1000));
}

#[tokio::test]
async fn close_at_reconnect_ceiling_removes_node() {
    let (registry, _gateway) = registry(test_options()).await;
    let (node, _frames) = add_connected(&registry, "a", None).await;
    let player = join_player(&node, "1", "2").await;
    let mut player_events = player.subscribe();
    let mut events = registry.subscribe();
    for _ in 0..registry.options().reconnect_tries {
        node.increment_attempts();
    }

    node.on_close(1006, "connection lost").await;

    wait_for_registry_event(&mut events, |e| matches!(e, RegistryEvent::Close { code: 1006, .. }))
        .await;
    wait_for_registry_event(&mut events, |e| {
        matches!(e, RegistryEvent::Disconnected { .. })
    })
    .await;
    assert!(matches!(
        next_event(&mut player_events).await,
        PlayerEvent::NodeDisconnect(_)
    ));
    assert!(player.link().is_destroyed().await);
    assert!(registry.nodes().await.is_empty());
    assert_eq!(registry.total_players().await, 0);
}

#[tokio::test]
async fn close_below_ceiling_fails_players_and_schedules_reconnect() {
    let (registry, _gateway) = registry(test_options()).await;
    let (node, _frames) = add_connected(&registry, "a", None).await;
    let player = join_player(&node, "1", "2").await;
    let mut player_events = player.subscribe();

    node.on_close(1006, "connection lost").await;

    assert!(matches!(
        next_event(&mut player_events).await,
        PlayerEvent::NodeDisconnect(_)
    ));
    wait_until(|| async { node.reconnect_attempts() == 1 }).await;
    assert_eq!(registry.nodes().await.len(), 1);
    assert_eq!(node.player_count().await, 0);
}

#[tokio::test]
async fn resumable_close_keeps_rooms() {
    let options = RegistryOptions {
        resume_key: Some("resume-me".into()),
        ..test_options()
    };
    let (registry, _gateway) = registry(options).await;
    let (node, _frames) = add_connected(&registry, "a", None).await;
    let player = join_player(&node, "1", "2").await;

    node.on_close(1006, "connection lost").await;

    wait_until(|| async { node.reconnect_attempts() == 1 }).await;
    assert!(!player.link().is_destroyed().await);
    assert_eq!(node.player_count().await, 1);
}

#[tokio::test]
async fn resume_key_is_only_sent_on_reconnect() {
    let (port, mut keys) = resume_key_recorder().await;
    let options = RegistryOptions {
        resume_key: Some("resume-me".into()),
        reconnect_interval_ms: 100,
        ..test_options()
    };
    let (registry, _gateway) = registry(options).await;

    registry
        .add_node(NodeOptions::new("live", "127.0.0.1", port, "youshallnotpass"))
        .await
        .unwrap();

    assert_eq!(next_handshake(&mut keys).await, None);
    assert_eq!(next_handshake(&mut keys).await.as_deref(), Some("resume-me"));
}

#[tokio::test]
async fn move_on_disconnect_prefers_same_group() {
    let options = RegistryOptions {
        move_on_disconnect: true,
        ..test_options()
    };
    let (registry, _gateway) = registry(options).await;
    let (source, _fs) = add_connected(&registry, "eu-1", Some("eu")).await;
    let (other, _fo) = add_connected(&registry, "us-1", Some("us")).await;
    let (sibling, mut sibling_frames) = add_connected(&registry, "eu-2", Some("eu")).await;
    set_load(&sibling, 10).await;
    set_load(&other, 0).await;

    let player = join_player(&source, "1", "2").await;
    player.play_track("QAAA", Default::default()).await.unwrap();
    let mut player_events = player.subscribe();

    source.on_close(1006, "connection lost").await;

    assert!(matches!(
        next_event(&mut player_events).await,
        PlayerEvent::Resumed
    ));
    assert!(Arc::ptr_eq(&player.node().await, &sibling));
    assert!(sibling.get_player("1").await.is_some());
    assert!(source.get_player("1").await.is_none());

    let ops: Vec<_> = drain_json(&mut sibling_frames)
        .into_iter()
        .map(|frame| frame["op"].clone())
        .collect();
    assert_eq!(ops, vec![json!("voiceUpdate"), json!("filters"), json!("play")]);
}

#[tokio::test]
async fn unresumed_ready_replays_rooms_on_the_same_node() {
    let options = RegistryOptions {
        move_on_disconnect: true,
        ..test_options()
    };
    let (registry, _gateway) = registry(options).await;
    let (node, mut frames) = add_connected(&registry, "a", None).await;
    let player = join_player(&node, "1", "2").await;
    drain_json(&mut frames);
    let mut player_events = player.subscribe();

    registry
        .handle_signal(NodeSignal::Ready {
            id: node.id().clone(),
            name: "a".into(),
            resumed: false,
        })
        .await;

    assert!(matches!(
        next_event(&mut player_events).await,
        PlayerEvent::Resumed
    ));
    let ops: Vec<_> = drain_json(&mut frames)
        .into_iter()
        .map(|frame| frame["op"].clone())
        .collect();
    assert_eq!(ops, vec![json!("voiceUpdate"), json!("filters")]);
    assert!(Arc::ptr_eq(&player.node().await, &node));
}

#[tokio::test]
async fn signals_from_removed_nodes_are_ignored() {
    let (registry, _gateway) = registry(test_options()).await;
    let stale = registered(&registry, "a", None);
    let mut events = registry.subscribe();

    registry
        .handle_signal(NodeSignal::Closed {
            id: stale.id().clone(),
            name: "a".into(),
            code: 1006,
            reason: "late".into(),
        })
        .await;

    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn join_routes_fragments_through_the_registry() {
    let (registry, gateway) = registry(test_options()).await;
    let (busy, _fb) = add_connected(&registry, "busy", None).await;
    let (idle, mut idle_frames) = add_connected(&registry, "idle", None).await;
    set_load(&busy, 20).await;

    let join = tokio::spawn({
        let registry = registry.clone();
        async move { registry.join(JoinOptions::new("1", "2"), None).await }
    });
    wait_for_handshake(&idle, "1").await;

    // Fragments for other users do not count.
    let mut foreign = state_fragment("1", Some("2"), "other");
    foreign.user_id = "999".into();
    registry.handle_voice_state(foreign).await;

    registry
        .handle_raw(&json!({
            "t": "VOICE_STATE_UPDATE",
            "d": {"guild_id": "1", "user_id": CLIENT_ID, "channel_id": "2", "session_id": "mine",
                  "self_mute": false, "self_deaf": false}
        }))
        .await
        .unwrap();
    registry
        .handle_raw(&json!({
            "t": "VOICE_SERVER_UPDATE",
            "d": {"guild_id": "1", "token": "tok", "endpoint": ENDPOINT}
        }))
        .await
        .unwrap();
    registry
        .handle_raw(&json!({"t": "MESSAGE_CREATE", "d": {}}))
        .await
        .unwrap();

    let player = join.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&player.node().await, &idle));
    assert_eq!(gateway.requests()[0].channel_id.as_deref(), Some("2"));

    let sent = drain_json(&mut idle_frames);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["sessionId"], "mine");

    assert_eq!(registry.total_players().await, 1);
    assert_eq!(registry.players().await.len(), 1);
    assert!(registry.get_player("1").await.is_some());
    assert!(registry.get_player("2").await.is_none());
}

#[tokio::test]
async fn malformed_raw_packet_is_a_protocol_error() {
    let (registry, _gateway) = registry(test_options()).await;
    let err = registry
        .handle_raw(&json!({"t": "VOICE_SERVER_UPDATE", "d": {"guild_id": 5}}))
        .await
        .unwrap_err();
    assert!(matches!(err, ShoalError::Protocol(_)));
}
