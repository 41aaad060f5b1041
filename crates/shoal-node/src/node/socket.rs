//! Background websocket task for one node connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use shoal_common::{Result, ShoalError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use super::NodeConnection;

/// Close code reported when the peer closes without a status.
const NO_STATUS: u16 = 1005;
/// Close code reported when the connection drops without a close frame.
const ABNORMAL: u16 = 1006;

fn header(value: &str, name: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ShoalError::Configuration(format!("invalid {name} header: {e}")))
}

/// Build the upgrade request with the node's identification headers.
pub(super) fn build_request(
    url: &str,
    auth: &str,
    client_id: &str,
    user_agent: &str,
    resume_key: Option<&str>,
) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ShoalError::Configuration(format!("invalid node url '{url}': {e}")))?;

    let headers = request.headers_mut();
    headers.insert("Authorization", header(auth, "Authorization")?);
    headers.insert("User-Id", header(client_id, "User-Id")?);
    headers.insert("Client-Name", header(user_agent, "Client-Name")?);
    headers.insert("User-Agent", header(user_agent, "User-Agent")?);
    if let Some(key) = resume_key {
        headers.insert("Resume-Key", header(key, "Resume-Key")?);
    }
    Ok(request)
}

/// Connect, run the open sequence, then read frames until the socket
/// closes. Frames are dispatched one at a time in arrival order.
pub(super) async fn run_socket(node: Arc<NodeConnection>, request: Request) {
    let timeout = node.options().rest_timeout();
    let connected = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request)).await;

    let (stream, response) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            node.fail_connect(ShoalError::Transport(format!("failed to connect: {e}")))
                .await;
            return;
        }
        Err(_elapsed) => {
            node.fail_connect(ShoalError::Transport(format!(
                "connection timed out after {}ms",
                timeout.as_millis()
            )))
            .await;
            return;
        }
    };

    let resumed = response
        .headers()
        .get("Session-Resumed")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    node.set_resumed(resumed);
    debug!(node = %node.name(), resumed, "Upgrade response received");

    let (mut ws_write, mut ws_read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let writer_node = node.name().to_string();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, WsMessage::Close(_));
            if let Err(e) = ws_write.send(message).await {
                debug!(node = %writer_node, error = %e, "Websocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    node.attach_transport(tx).await;
    node.on_open().await;

    let mut code = ABNORMAL;
    let mut reason = String::from("connection lost");
    while let Some(frame) = ws_read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => node.handle_message(text.as_str()).await,
            Ok(WsMessage::Close(frame)) => {
                match frame {
                    Some(frame) => {
                        code = frame.code.into();
                        reason = frame.reason.as_str().to_string();
                    }
                    None => {
                        code = NO_STATUS;
                        reason.clear();
                    }
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                node.on_transport_error(ShoalError::Transport(e.to_string()))
                    .await;
                code = 1011;
                reason = e.to_string();
                break;
            }
        }
    }

    writer.abort();
    node.on_close(code, &reason).await;
}
