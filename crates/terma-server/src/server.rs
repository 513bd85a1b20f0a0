use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use terma_config::Config;
use terma_core::{SessionRegistry, DEFAULT_CLEANUP_INTERVAL, DEFAULT_IDLE_TIMEOUT};
use terma_llm::{Analyzer, ContextStore, HttpAnalyzer};

use crate::hermes::{HermesClient, DEFAULT_HERMES_URL};
use crate::{routes, ws};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state behind every HTTP and WebSocket handler.
pub struct ServerState {
    pub registry: Arc<SessionRegistry>,
    pub analyzer: Arc<dyn Analyzer>,
    pub hermes: Option<Arc<HermesClient>>,
    pub config: Config,
    /// Currently selected LLM provider and model, mutable via
    /// `POST /api/llm/set`.
    pub llm_selection: std::sync::Mutex<(String, String)>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(registry: Arc<SessionRegistry>, analyzer: Arc<dyn Analyzer>, config: Config) -> Self {
        let selection = (config.llm.provider.clone(), config.llm.model.clone());
        Self {
            registry,
            analyzer,
            hermes: None,
            config,
            llm_selection: std::sync::Mutex::new(selection),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Publish a Hermes event in the background, if registration is active.
    pub fn publish_event(&self, event: &str, payload: serde_json::Value) {
        if let Some(hermes) = &self.hermes {
            let hermes = hermes.clone();
            let event = event.to_string();
            tokio::spawn(async move {
                hermes.publish_event(&event, payload).await;
            });
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| fallback.to_string())
}

fn env_truthy(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Assemble the server state from the resolved configuration: registry with
/// its reaper running, HTTP analyzer against the LLM adapter, and an
/// optional Hermes client. The analyzer's conversation context is cleared
/// whenever the registry closes a session.
pub fn build_state(config: Config) -> Arc<ServerState> {
    let registry = Arc::new(SessionRegistry::with_shell(
        config.terminal.default_shell.clone(),
        DEFAULT_CLEANUP_INTERVAL,
        DEFAULT_IDLE_TIMEOUT,
    ));
    registry.start();

    let contexts = Arc::new(ContextStore::new(config.llm.system_prompt.clone()));
    let adapter_url = env_or("TEKTON_LLM_URL", &config.llm.adapter_url);
    let provider = env_or("TEKTON_LLM_PROVIDER", &config.llm.provider);
    let model = env_or("TEKTON_LLM_MODEL", &config.llm.model);
    let analyzer: Arc<dyn Analyzer> =
        Arc::new(HttpAnalyzer::new(adapter_url, provider.clone(), model.clone(), contexts));

    {
        let analyzer = analyzer.clone();
        registry.set_close_hook(move |session_id| analyzer.clear_context(session_id));
    }

    let hermes = env_truthy("REGISTER_WITH_HERMES")
        .then(|| Arc::new(HermesClient::new(env_or("HERMES_URL", DEFAULT_HERMES_URL))));

    let mut state = ServerState::new(registry, analyzer, config);
    *state.llm_selection.lock().unwrap() = (provider, model);
    state.hermes = hermes;
    Arc::new(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Serve the REST API and the terminal WebSocket on one listener.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let app = routes::router()
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serve only the terminal WebSocket, for deployments that keep terminal
/// traffic on a dedicated port (`TERMA_WS_PORT`).
pub async fn run_ws_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ws/{session_id}", get(ws::ws_connect))
        .route("/ws/{*path}", get(ws::ws_reject))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("WebSocket server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Register with Hermes and start the heartbeat, when configured.
pub async fn announce(state: &Arc<ServerState>) {
    let Some(hermes) = &state.hermes else {
        return;
    };
    let port = state.config.server.port;
    let api_url = format!("http://localhost:{port}/api");
    let ws_url = format!("ws://localhost:{port}/ws");
    if hermes.register(&api_url, &ws_url).await {
        hermes.start_heartbeat(state.registry.clone());
    }
}
