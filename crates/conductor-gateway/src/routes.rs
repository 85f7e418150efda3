use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use conductor_core::config::AgentConfig;
use conductor_core::session::SessionType;
use conductor_core::types::{DataMap, ExecutionId, SessionId};
use conductor_core::workflow::Workflow;
use conductor_engine::ExecuteOptions;

use crate::error::ApiError;
use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiResult = Result<(StatusCode, Json<serde_json::Value>), ApiError>;

fn ok(value: serde_json::Value) -> ApiResult {
    Ok((StatusCode::OK, Json(value)))
}

// GET /api/health (no auth required)
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Workflows ───────────────────────────────────────────────────

// GET /api/workflows
pub async fn list_workflows(_: Authenticated, State(state): State<Arc<AppState>>) -> ApiResult {
    let workflows: Vec<serde_json::Value> = state
        .services
        .engine
        .list_workflows()
        .iter()
        .map(|wf| serde_json::json!(wf.as_ref()))
        .collect();
    ok(serde_json::json!({ "workflows": workflows }))
}

// POST /api/workflows
pub async fn register_workflow(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(workflow): Json<Workflow>,
) -> ApiResult {
    let id = workflow.id.clone();
    let order = state.services.engine.register_workflow(workflow)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "workflow_id": id, "order": order })),
    ))
}

#[derive(Deserialize)]
pub struct StartExecutionBody {
    #[serde(default)]
    pub input: DataMap,
    #[serde(default)]
    pub session_id: Option<String>,
}

// POST /api/workflows/{id}/executions
pub async fn start_execution(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    Json(body): Json<StartExecutionBody>,
) -> ApiResult {
    let options = ExecuteOptions {
        session_id: body.session_id.as_deref().map(SessionId::from_string),
    };
    let execution_id = state
        .services
        .engine
        .execute_workflow_with(&workflow_id, body.input, options)
        .await?;
    info!(workflow_id = %workflow_id, execution_id = %execution_id, "Execution started via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "execution_id": execution_id })),
    ))
}

// ── Executions ──────────────────────────────────────────────────

// GET /api/executions
pub async fn list_executions(_: Authenticated, State(state): State<Arc<AppState>>) -> ApiResult {
    let executions = state.services.engine.list_executions();
    ok(serde_json::json!({ "executions": executions }))
}

// GET /api/executions/{id}
pub async fn get_execution(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let execution = state
        .services
        .engine
        .get_execution_status(&ExecutionId::from_string(&id))?;
    ok(serde_json::json!(execution))
}

// ── Agents ──────────────────────────────────────────────────────

// GET /api/agents
pub async fn list_agents(_: Authenticated, State(state): State<Arc<AppState>>) -> ApiResult {
    let agents = state.services.registry.list();
    let bound = state.services.workers.list();
    ok(serde_json::json!({ "agents": agents, "workers": bound }))
}

// POST /api/agents
pub async fn register_agent(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(agent): Json<AgentConfig>,
) -> ApiResult {
    state.services.add_agent(&agent);
    let record = state.services.registry.get(&agent.id);
    info!(agent_id = %agent.id, "Agent registered via API");
    Ok((StatusCode::CREATED, Json(serde_json::json!(record))))
}

// ── Sessions ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSessionBody {
    pub initiator_id: String,
    pub participants: Vec<String>,
    #[serde(rename = "type")]
    pub session_type: SessionType,
}

// GET /api/sessions
pub async fn list_sessions(_: Authenticated, State(state): State<Arc<AppState>>) -> ApiResult {
    let sessions = state.services.sessions.active_sessions();
    ok(serde_json::json!({ "sessions": sessions }))
}

// POST /api/sessions
pub async fn create_session(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult {
    let session = state.services.sessions.create_session(
        &body.initiator_id,
        body.participants,
        body.session_type,
    )?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(session))))
}

// DELETE /api/sessions/{id}
pub async fn close_session(
    _: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let session = state
        .services
        .sessions
        .close_session(&SessionId::from_string(&id))?;
    ok(serde_json::json!(session))
}
