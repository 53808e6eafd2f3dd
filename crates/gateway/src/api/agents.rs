//! Agent CRUD endpoints.
//!
//! - `GET    /v1/agents`      — list (default agent first)
//! - `POST   /v1/agents`      — create a user agent
//! - `PUT    /v1/agents/{id}` — update (path id wins over body id)
//! - `DELETE /v1/agents/{id}` — delete (409 for built-ins)

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use tb_agents::Agent;

use crate::api::error_response;
use crate::state::AppState;

pub async fn list_agents(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.agents.list();
    Json(serde_json::json!({
        "agents": agents,
        "count": agents.len(),
    }))
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(agent): Json<Agent>,
) -> Response {
    match state.agents.create(agent) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut agent): Json<Agent>,
) -> Response {
    agent.id = id;
    match state.agents.update(agent) {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_agent(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.agents.delete(&id) {
        Ok(()) => Json(serde_json::json!({ "deleted": id })).into_response(),
        Err(e) => error_response(e),
    }
}
