pub mod agents;
pub mod auth;
pub mod chat;
pub mod memory;
pub mod models;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": { "message": ... } }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": { "message": message.into() } })),
    )
        .into_response()
}

/// Map a domain error onto the HTTP surface.
pub(crate) fn error_response(err: tb_domain::error::Error) -> Response {
    use tb_domain::error::Error;
    match &err {
        Error::Auth(_) => api_error(StatusCode::UNAUTHORIZED, err.to_string()),
        Error::AgentNotFound(_) => api_error(StatusCode::NOT_FOUND, err.to_string()),
        Error::InvalidAgentId(_) => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        Error::AgentExists(_) | Error::BuiltInProtected(_) => {
            api_error(StatusCode::CONFLICT, err.to_string())
        }
        Error::BudgetExceeded { window, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": { "message": err.to_string(), "window": window }
            })),
        )
            .into_response(),
        Error::Upstream { status, message } => {
            let code =
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            api_error(code, message.clone())
        }
        Error::Timeout(_) | Error::Http(_) | Error::Provider { .. } => {
            api_error(StatusCode::BAD_GATEWAY, err.to_string())
        }
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the full API router. Routes split into **public** (no auth) and
/// **protected** (bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        // Chat (the core entry point)
        .route("/v1/chat/completions", post(chat::chat_completions))
        // Backends
        .route("/v1/models", get(models::list_models))
        // Agents
        .route("/v1/agents", get(agents::list_agents))
        .route("/v1/agents", post(agents::create_agent))
        .route("/v1/agents/:id", put(agents::update_agent))
        .route("/v1/agents/:id", delete(agents::delete_agent))
        // Memory
        .route("/v1/memory/add", post(memory::add))
        .route("/v1/memory/search", get(memory::search))
        .route("/v1/memory/remove", post(memory::remove))
        .route("/v1/memory/stats", get(memory::stats))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
