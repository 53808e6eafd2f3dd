//! Memory endpoints.
//!
//! - `POST /v1/memory/add`            — manual insert (category `manual`
//!   unless specified)
//! - `GET  /v1/memory/search?q=&k=`   — retrieval debug/API
//! - `POST /v1/memory/remove`         — remove by id
//! - `GET  /v1/memory/stats`          — counts and per-category breakdown

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use tb_memory::MemoryCategory;

use crate::api::{api_error, error_response};
use crate::state::AppState;

// ── POST /v1/memory/add ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddRequest {
    pub text: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
}

pub async fn add(State(state): State<AppState>, Json(body): Json<AddRequest>) -> Response {
    if body.text.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "text must not be empty");
    }
    let category = match body.category.as_deref() {
        None => MemoryCategory::Manual,
        Some(raw) => match raw.parse() {
            Ok(category) => category,
            Err(e) => return error_response(e),
        },
    };

    match state
        .memory_index
        .add(
            &body.text,
            category,
            body.source.as_deref().unwrap_or("api"),
            body.importance.unwrap_or(0.7),
        )
        .await
    {
        Ok(outcome) => Json(serde_json::json!({
            "id": outcome.id,
            "duplicate": outcome.duplicate,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

// ── GET /v1/memory/search ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub min_score: f32,
}

fn default_k() -> usize {
    5
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    match state
        .memory_index
        .search(&query.q, query.k, query.min_score)
        .await
    {
        Ok(hits) => {
            // Embeddings stay server-side; clients get the readable fields.
            let memories: Vec<serde_json::Value> = hits
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "id": hit.record.id,
                        "text": hit.record.text,
                        "category": hit.record.category.as_str(),
                        "source": hit.record.source,
                        "importance": hit.record.importance,
                        "createdAt": hit.record.created_at,
                        "score": hit.score,
                    })
                })
                .collect();
            Json(serde_json::json!({
                "query": query.q,
                "count": memories.len(),
                "memories": memories,
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

// ── POST /v1/memory/remove ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub id: u64,
}

pub async fn remove(State(state): State<AppState>, Json(body): Json<RemoveRequest>) -> Response {
    if state.memory_index.remove(body.id) {
        Json(serde_json::json!({ "removed": body.id })).into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, format!("no memory with id {}", body.id))
    }
}

// ── GET /v1/memory/stats ────────────────────────────────────────────

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "count": state.memory_index.count(),
        "categories": state.memory_index.category_counts(),
    }))
}
