use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use terma_core::{TerminalError, TerminalInfo};

use crate::error::{ApiError, Result};
use crate::mcp;
use crate::server::{ServerState, VERSION};
use crate::ws;

pub fn router() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/write", post(write_to_session))
        .route("/api/sessions/{id}/read", get(read_from_session))
        .route("/api/llm/providers", get(llm_providers))
        .route("/api/llm/models/{provider_id}", get(llm_models))
        .route("/api/llm/set", post(llm_set))
        .nest("/api/mcp/v2", mcp::router())
        .route("/ws/{session_id}", get(ws::ws_connect))
        .route("/ws/{*path}", get(ws::ws_reject))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Terma Terminal API",
        "version": VERSION,
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime: f64,
    version: String,
    active_sessions: usize,
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime: state.uptime_secs(),
        version: VERSION.to_string(),
        active_sessions: state.registry.len().await,
    })
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    sessions: Vec<TerminalInfo>,
}

async fn list_sessions(State(state): State<Arc<ServerState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.registry.list().await,
    })
}

#[derive(Debug, Deserialize)]
struct SessionCreate {
    shell_command: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: String,
    created_at: f64,
}

async fn create_session(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<SessionCreate>,
) -> Result<Json<SessionResponse>> {
    let session_id = state
        .registry
        .create(None, req.shell_command.clone())
        .await
        .map_err(|e| ApiError::CreateFailed(e.to_string()))?;

    let terminal = state
        .registry
        .get(&session_id)
        .await
        .ok_or_else(|| ApiError::CreateFailed("session created but not found".to_string()))?;
    let info = terminal.info();

    state.publish_event(
        "terminal.session.created",
        json!({
            "session_id": session_id,
            "shell_command": req.shell_command,
            "created_at": info.created_at,
        }),
    );

    Ok(Json(SessionResponse {
        session_id,
        created_at: info.created_at,
    }))
}

async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<TerminalInfo>> {
    let terminal = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session {id} not found")))?;
    Ok(Json(terminal.info()))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: String,
}

async fn delete_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>> {
    if !state.registry.close(&id).await {
        return Err(ApiError::NotFound(format!("Session {id} not found")));
    }

    state.publish_event(
        "terminal.session.closed",
        json!({
            "session_id": id,
            "closed_at": chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }),
    );

    Ok(Json(StatusResponse {
        status: "success".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    data: String,
}

#[derive(Debug, Serialize)]
struct WriteResponse {
    status: String,
    bytes_written: usize,
}

async fn write_to_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteResponse>> {
    let terminal = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session {id} not found")))?;

    let bytes_written = terminal.write(req.data.as_bytes()).await.map_err(|e| match e {
        TerminalError::NotActive => ApiError::BadRequest("session is not active".to_string()),
        other => ApiError::Internal(other.to_string()),
    })?;

    Ok(Json(WriteResponse {
        status: "success".to_string(),
        bytes_written,
    }))
}

#[derive(Debug, Deserialize)]
struct ReadQuery {
    size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    data: String,
}

async fn read_from_session(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<ReadResponse>> {
    let terminal = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session {id} not found")))?;

    let data = terminal.take(query.size.unwrap_or(1024)).map_err(|e| match e {
        TerminalError::NotActive => ApiError::BadRequest("session is not active".to_string()),
        other => ApiError::Internal(other.to_string()),
    })?;
    Ok(Json(ReadResponse {
        data: String::from_utf8_lossy(&data).into_owned(),
    }))
}

async fn llm_providers(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let mut providers = HashMap::new();
    for p in terma_llm::providers() {
        providers.insert(
            p.id,
            json!({
                "name": p.name,
                "models": p.models,
                "default": p.default_model,
            }),
        );
    }

    let (current_provider, current_model) = state.llm_selection.lock().unwrap().clone();
    Json(json!({
        "providers": providers,
        "current_provider": current_provider,
        "current_model": current_model,
    }))
}

async fn llm_models(
    State(state): State<Arc<ServerState>>,
    Path(provider_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let provider = terma_llm::provider(&provider_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown provider: {provider_id}")))?;

    let (_, current_model) = state.llm_selection.lock().unwrap().clone();
    Ok(Json(json!({
        "models": provider.models,
        "current_model": current_model,
    })))
}

#[derive(Debug, Deserialize)]
struct LlmSetRequest {
    provider: String,
    model: String,
}

async fn llm_set(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<LlmSetRequest>,
) -> Result<Json<StatusResponse>> {
    if !terma_llm::model_exists(&req.provider, &req.model) {
        return Err(ApiError::BadRequest(format!(
            "unknown provider/model: {}/{}",
            req.provider, req.model
        )));
    }

    *state.llm_selection.lock().unwrap() = (req.provider.clone(), req.model.clone());

    // Persist for the next startup; the running analyzer keeps its
    // startup-resolved selection.
    let mut config = state.config.clone();
    config.llm.provider = req.provider;
    config.llm.model = req.model;
    if let Err(e) = terma_config::save(&terma_config::config_path(), &config) {
        tracing::warn!(error = %e, "failed to persist LLM selection");
    }

    Ok(Json(StatusResponse {
        status: "success".to_string(),
    }))
}
