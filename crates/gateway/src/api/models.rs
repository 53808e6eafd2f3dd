//! `GET /v1/models` — enumerate the backends the router can reach.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendInfo {
    id: String,
    kind: String,
    base_url: String,
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_model: Option<String>,
    model_prefixes: Vec<String>,
}

pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let backends: Vec<BackendInfo> = state
        .providers
        .list()
        .iter()
        .map(|handle| BackendInfo {
            id: handle.id().to_string(),
            kind: format!("{:?}", handle.kind()).to_lowercase(),
            base_url: handle.config.base_url.clone(),
            available: handle.available(),
            default_model: handle.config.default_model.clone(),
            model_prefixes: handle.config.model_prefixes.clone(),
        })
        .collect();

    Json(serde_json::json!({
        "object": "list",
        "data": backends,
    }))
}
