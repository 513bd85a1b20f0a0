use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{broadcast, mpsc};

use crate::protocol::{derive_query, AssistQuery, ClientMessage, ServerMessage};
use crate::server::ServerState;

/// Close codes used by the bridge.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Depth of the per-connection outbound frame queue.
const OUTBOUND_QUEUE: usize = 256;

static SESSION_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

pub fn valid_session_id(id: &str) -> bool {
    SESSION_ID_RE.is_match(id)
}

/// `GET /ws/{session_id}`: bind one client connection to a session,
/// creating the session when it does not exist yet.
pub async fn ws_connect(
    Path(session_id): Path<String>,
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Catch-all for `/ws/...` paths that are not a single well-formed session
/// id (extra segments, trailing slash). The upgrade completes so the client
/// receives a proper policy-violation close.
pub async fn ws_reject(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket| async move {
        close_with(&mut socket, CLOSE_POLICY_VIOLATION, "invalid path").await;
    })
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(mut socket: WebSocket, session_id: String, state: Arc<ServerState>) {
    if !valid_session_id(&session_id) {
        tracing::warn!(session_id, "rejecting WebSocket with invalid session id");
        close_with(&mut socket, CLOSE_POLICY_VIOLATION, "invalid path").await;
        return;
    }

    // Resolve or create the session, then subscribe to its output.
    let terminal = match state.registry.get(&session_id).await {
        Some(terminal) => terminal,
        None => {
            if let Err(e) = state.registry.create(Some(session_id.clone()), None).await {
                tracing::error!(session_id, error = %e, "failed to create session for WebSocket");
                close_with(&mut socket, CLOSE_INTERNAL_ERROR, "cannot create").await;
                return;
            }
            match state.registry.get(&session_id).await {
                Some(terminal) => terminal,
                None => {
                    close_with(&mut socket, CLOSE_INTERNAL_ERROR, "cannot create").await;
                    return;
                }
            }
        }
    };

    let subscription = terminal.subscribe();
    drop(terminal);
    tracing::info!(session_id, "WebSocket connected");

    // All outbound frames funnel through one queue: the backlog prime, live
    // output forwarded from the hub, and analyzer replies.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

    if !subscription.backlog.is_empty() {
        let _ = out_tx.send(ServerMessage::output(&subscription.backlog)).await;
    }

    let mut hub_rx = subscription.rx;
    let forward_tx = out_tx.clone();
    let forward = tokio::spawn(async move {
        loop {
            match hub_rx.recv().await {
                Ok(chunk) => {
                    if forward_tx.send(ServerMessage::output(&chunk)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagging; output chunks dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(text.as_str(), &session_id, &state, &out_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    // Tearing down the forward task drops the hub receiver (unsubscribe).
    // The terminal itself stays alive; other bridges may share it.
    forward.abort();
    tracing::info!(session_id, "WebSocket disconnected");
}

/// Decode and apply one inbound frame. Invalid JSON and unknown types are
/// logged and dropped; the connection stays open.
async fn dispatch(
    text: &str,
    session_id: &str,
    state: &Arc<ServerState>,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "invalid JSON frame");
            return;
        }
    };

    let message: ClientMessage = match serde_json::from_value(value.clone()) {
        Ok(message) => message,
        Err(_) => {
            let kind = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>");
            tracing::warn!(session_id, kind, "unknown message type");
            return;
        }
    };

    match message {
        ClientMessage::Input { data } => {
            if let Err(e) = state
                .registry
                .write_to_session(session_id, data.as_bytes())
                .await
            {
                tracing::warn!(session_id, error = %e, "input write failed");
            }
        }
        ClientMessage::Resize { rows, cols } => {
            if let Err(e) = state.registry.resize_session(session_id, rows, cols).await {
                tracing::warn!(session_id, rows, cols, error = %e, "resize failed");
            }
        }
        ClientMessage::LlmAssist {
            command,
            is_output_analysis,
        } => {
            spawn_assist(session_id, command, is_output_analysis, state, out_tx);
        }
    }
}

/// Run an analyzer request off the inbound loop so input and resize keep
/// flowing while the analysis is in flight.
fn spawn_assist(
    session_id: &str,
    command: String,
    is_output_analysis: bool,
    state: &Arc<ServerState>,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    let analyzer = state.analyzer.clone();
    let out_tx = out_tx.clone();
    let session_id = session_id.to_string();

    tokio::spawn(async move {
        let _ = out_tx
            .send(ServerMessage::LlmResponse {
                content: "Analyzing...".to_string(),
                loading: Some(true),
                error: None,
            })
            .await;

        let result = match derive_query(&command, is_output_analysis) {
            AssistQuery::Empty => Ok("Please provide a command to explain.".to_string()),
            AssistQuery::Command(cmd) => analyzer.analyze_command(&session_id, &cmd).await,
            AssistQuery::Output { command, output } => {
                analyzer.analyze_output(&session_id, &command, &output).await
            }
        };

        let frame = match result {
            Ok(content) => ServerMessage::LlmResponse {
                content,
                loading: Some(false),
                error: None,
            },
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "LLM analysis failed");
                ServerMessage::LlmResponse {
                    content: format!("Failed to analyze command: {e}"),
                    loading: Some(false),
                    error: Some(true),
                }
            }
        };
        let _ = out_tx.send(frame).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_alphabet() {
        assert!(valid_session_id("abc-123"));
        assert!(valid_session_id("ABC"));
        assert!(valid_session_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!valid_session_id(""));
        assert!(!valid_session_id("abc/def"));
        assert!(!valid_session_id("abc_def"));
        assert!(!valid_session_id("abc def"));
    }
}
