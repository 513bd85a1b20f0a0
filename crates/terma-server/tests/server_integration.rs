use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use terma_config::Config;
use terma_core::SessionRegistry;
use terma_llm::ScriptedAnalyzer;
use terma_server::{routes, ServerState};

const WAIT: Duration = Duration::from_secs(2);

async fn start_test_server(analyzer: ScriptedAnalyzer) -> (SocketAddr, Arc<ServerState>) {
    let registry = Arc::new(SessionRegistry::with_shell(
        "/bin/sh",
        Duration::from_secs(3600),
        Duration::from_secs(86_400),
    ));
    let state = Arc::new(ServerState::new(
        registry,
        Arc::new(analyzer),
        Config::default(),
    ));

    let app = routes::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (addr, state)
}

async fn ws_connect(
    addr: SocketAddr,
    session_id: &str,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("ws://{addr}/ws/{session_id}");
    let (socket, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect");
    socket
}

/// Read frames until one matches, concatenating `output` frame payloads.
async fn collect_output_until<S>(socket: &mut S, needle: &str) -> String
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut collected = String::new();
    loop {
        let msg = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for output")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "output" {
                collected.push_str(value["data"].as_str().unwrap_or(""));
                if collected.contains(needle) {
                    return collected;
                }
            }
        }
    }
}

#[tokio::test]
async fn rest_session_lifecycle() {
    let (addr, _state) = start_test_server(ScriptedAnalyzer::new()).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    // Create.
    let created: serde_json::Value = client
        .post(format!("{base}/api/sessions"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = created["session_id"].as_str().unwrap().to_string();
    assert!(created["created_at"].as_f64().unwrap() > 0.0);

    // List contains it.
    let listed: serde_json::Value = client
        .get(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let sessions = listed["sessions"].as_array().unwrap();
    assert!(sessions.iter().any(|s| s["id"] == session_id.as_str()));

    // Get by id.
    let info: serde_json::Value = client
        .get(format!("{base}/api/sessions/{session_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["active"], true);

    // Write, then poll the REST read endpoint for the echo.
    let write: serde_json::Value = client
        .post(format!("{base}/api/sessions/{session_id}/write"))
        .json(&serde_json::json!({"data": "echo rest-marker\n"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(write["status"], "success");
    assert_eq!(write["bytes_written"], 17);

    let mut seen = String::new();
    for _ in 0..40 {
        let read: serde_json::Value = client
            .get(format!("{base}/api/sessions/{session_id}/read?size=65536"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        seen.push_str(read["data"].as_str().unwrap_or(""));
        if seen.contains("rest-marker") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(seen.contains("rest-marker"), "read endpoint never saw the echo: {seen:?}");

    // Delete, then the session is gone.
    let deleted = client
        .delete(format!("{base}/api/sessions/{session_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let gone = client
        .get(format!("{base}/api/sessions/{session_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn delete_unknown_session_returns_404() {
    let (addr, state) = start_test_server(ScriptedAnalyzer::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .delete(format!("http://{addr}/api/sessions/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn health_reports_session_count() {
    let (addr, state) = start_test_server(ScriptedAnalyzer::new()).await;
    state.registry.create(None, None).await.unwrap();

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_sessions"], 1);
}

#[tokio::test]
async fn ws_input_echoes_output() {
    let (addr, _state) = start_test_server(ScriptedAnalyzer::new()).await;
    let mut socket = ws_connect(addr, "ws-echo-test").await;

    socket
        .send(WsMessage::Text(
            r#"{"type":"input","data":"echo ws-marker\n"}"#.into(),
        ))
        .await
        .unwrap();

    let output = collect_output_until(&mut socket, "ws-marker").await;
    assert!(output.contains("ws-marker"));
}

#[tokio::test]
async fn ws_resize_changes_window() {
    let (addr, _state) = start_test_server(ScriptedAnalyzer::new()).await;
    let mut socket = ws_connect(addr, "ws-resize-test").await;

    socket
        .send(WsMessage::Text(
            r#"{"type":"resize","rows":40,"cols":132}"#.into(),
        ))
        .await
        .unwrap();
    socket
        .send(WsMessage::Text(
            r#"{"type":"input","data":"stty size\n"}"#.into(),
        ))
        .await
        .unwrap();

    let output = collect_output_until(&mut socket, "40 132").await;
    assert!(output.contains("40 132"));
}

#[tokio::test]
async fn ws_llm_assist_sends_loading_then_result() {
    let analyzer = ScriptedAnalyzer::with_responses(["Lists directory contents".to_string()]);
    let (addr, _state) = start_test_server(analyzer).await;
    let mut socket = ws_connect(addr, "ws-assist-test").await;

    socket
        .send(WsMessage::Text(
            r#"{"type":"llm_assist","command":"ls -la"}"#.into(),
        ))
        .await
        .unwrap();

    let mut responses = Vec::new();
    while responses.len() < 2 {
        let msg = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for llm_response")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "llm_response" {
                responses.push(value);
            }
        }
    }

    assert_eq!(responses[0]["loading"], true);
    assert_eq!(responses[1]["loading"], false);
    assert_eq!(responses[1]["content"], "Lists directory contents");
}

#[tokio::test]
async fn ws_assist_failure_sets_error_flag() {
    let (addr, _state) = start_test_server(ScriptedAnalyzer::failing()).await;
    let mut socket = ws_connect(addr, "ws-assist-fail").await;

    socket
        .send(WsMessage::Text(
            r#"{"type":"llm_assist","command":"ls"}"#.into(),
        ))
        .await
        .unwrap();

    loop {
        let msg = timeout(WAIT, socket.next())
            .await
            .expect("timed out")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "llm_response" && value["loading"] == false {
                assert_eq!(value["error"], true);
                break;
            }
        }
    }
}

#[tokio::test]
async fn ws_invalid_session_id_closes_with_policy_violation() {
    let (addr, state) = start_test_server(ScriptedAnalyzer::new()).await;
    // Underscores are outside the session-id alphabet.
    let mut socket = ws_connect(addr, "bad_id").await;

    loop {
        match timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Policy);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => panic!("connection ended without a close frame"),
        }
    }
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn ws_extra_path_segments_close_with_policy_violation() {
    let (addr, _state) = start_test_server(ScriptedAnalyzer::new()).await;
    let mut socket = ws_connect(addr, "abc/def").await;

    loop {
        match timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(WsMessage::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Policy);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => panic!("connection ended without a close frame"),
        }
    }
}

#[tokio::test]
async fn ws_unknown_message_types_keep_connection_open() {
    let (addr, _state) = start_test_server(ScriptedAnalyzer::new()).await;
    let mut socket = ws_connect(addr, "ws-unknown-test").await;

    socket
        .send(WsMessage::Text(r#"{"type":"bogus"}"#.into()))
        .await
        .unwrap();
    socket
        .send(WsMessage::Text("not json at all".into()))
        .await
        .unwrap();

    // The connection survives both frames and still serves input.
    socket
        .send(WsMessage::Text(
            r#"{"type":"input","data":"echo still-alive\n"}"#.into(),
        ))
        .await
        .unwrap();
    let output = collect_output_until(&mut socket, "still-alive").await;
    assert!(output.contains("still-alive"));
}

#[tokio::test]
async fn ws_backlog_primes_reconnecting_client() {
    let (addr, state) = start_test_server(ScriptedAnalyzer::new()).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let created: serde_json::Value = client
        .post(format!("{base}/api/sessions"))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    // Flood the hub past its cap.
    client
        .post(format!("{base}/api/sessions/{session_id}/write"))
        .json(&serde_json::json!({"data": "head -c 60000 /dev/zero | tr '\\0' A\n"}))
        .send()
        .await
        .unwrap();

    let terminal = state.registry.get(&session_id).await.unwrap();
    let mut capped = false;
    for _ in 0..100 {
        if terminal.hub().backlog_len() == 50_000 {
            capped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(capped, "backlog never reached its cap");

    // A fresh subscriber's first frame is exactly the capped backlog.
    let mut socket = ws_connect(addr, &session_id).await;
    loop {
        let msg = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for prime")
            .expect("socket closed")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "output" {
                let data = value["data"].as_str().unwrap();
                assert_eq!(data.len(), 50_000);
                assert!(data.contains("AAAA"));
                break;
            }
        }
    }
}
