//! Client for the Hermes service registry: registration, heartbeat, and
//! event publishing. Hermes being unreachable is never fatal to the
//! terminal server; every failure here is logged and absorbed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use terma_core::SessionRegistry;

pub const DEFAULT_HERMES_URL: &str = "http://localhost:8001";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const COMPONENT_NAME: &str = "Terma";
const COMPONENT_DESCRIPTION: &str = "Terminal server with PTY sessions and LLM assistance";

const CAPABILITIES: &[&str] = &[
    "terminal.create",
    "terminal.close",
    "terminal.write",
    "terminal.read",
    "terminal.list",
    "terminal.resize",
];

pub struct HermesClient {
    client: reqwest::Client,
    base_url: String,
    registered: AtomicBool,
    heartbeat: std::sync::Mutex<Option<JoinHandle<()>>>,
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl HermesClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            registered: AtomicBool::new(false),
            heartbeat: std::sync::Mutex::new(None),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Advertise this component and its capabilities. Returns whether
    /// registration succeeded.
    pub async fn register(&self, api_url: &str, ws_url: &str) -> bool {
        let payload = json!({
            "name": COMPONENT_NAME,
            "description": COMPONENT_DESCRIPTION,
            "version": crate::server::VERSION,
            "capabilities": CAPABILITIES,
            "endpoints": {
                "api": api_url,
                "websocket": ws_url,
            },
        });

        match self
            .client
            .post(self.url("/api/register"))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                self.registered.store(true, Ordering::Release);
                tracing::info!(hermes = %self.base_url, "registered with Hermes");
                true
            }
            Ok(response) => {
                tracing::error!(status = %response.status(), "Hermes registration rejected");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Hermes registration failed");
                false
            }
        }
    }

    /// Send periodic heartbeats carrying the live session count.
    pub fn start_heartbeat(self: &Arc<Self>, registry: Arc<SessionRegistry>) {
        let hermes = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            while hermes.is_registered() {
                ticker.tick().await;
                hermes.send_heartbeat(&registry).await;
            }
        });
        *self.heartbeat.lock().unwrap() = Some(handle);
    }

    async fn send_heartbeat(&self, registry: &SessionRegistry) {
        let payload = json!({
            "component": COMPONENT_NAME,
            "status": "healthy",
            "timestamp": now_secs(),
            "metrics": {
                "active_sessions": registry.len().await,
            },
        });

        match self
            .client
            .post(self.url("/api/heartbeat"))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), "heartbeat rejected");
            }
            Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
            _ => {}
        }
    }

    /// Publish a component event; a no-op unless registered.
    pub async fn publish_event(&self, event: &str, payload: Value) {
        if !self.is_registered() {
            return;
        }

        let body = json!({
            "event": event,
            "source": COMPONENT_NAME,
            "timestamp": now_secs(),
            "payload": payload,
        });

        if let Err(e) = self
            .client
            .post(self.url("/api/events"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            tracing::warn!(event, error = %e, "event publish failed");
        }
    }

    /// Withdraw the registration and stop the heartbeat.
    pub async fn deregister(&self) {
        if !self.registered.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.heartbeat.lock().unwrap().take() {
            handle.abort();
        }

        let payload = json!({ "name": COMPONENT_NAME });
        if let Err(e) = self
            .client
            .post(self.url("/api/deregister"))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            tracing::warn!(error = %e, "deregistration failed");
        }
    }
}
