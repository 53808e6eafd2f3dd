//! `/v1/chat/completions` — the request router.
//!
//! Accepts the OpenAI chat-completion format and runs the full pipeline:
//! agent resolution, access-level tool gating, budget preflight, model →
//! provider selection, prompt enrichment via the weaver, privacy redaction
//! for remote providers, dispatch (streamed or blocking), placeholder
//! restoration on assistant text, token accounting, and the fire-and-forget
//! Librarian enqueue. Dropping the client stream cancels the in-flight
//! backend call and skips the enqueue.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::Serialize;

use tb_domain::chat::{ChatCompletionRequest, ProviderRequest, DEFAULT_MODEL_SENTINEL};
use tb_domain::error::Error;
use tb_domain::stream::{BoxStream, StreamEvent, Usage};
use tb_memory::workers::retrieve_block;
use tb_memory::{JobQueue, MemoryJob};
use tb_privacy::PrivacyFilter;
use tb_providers::{build_provider_request, ProviderHandle};
use tb_weaver::{assemble, decision_confidence, merge_into_messages, WeaveInput};

use crate::api::{api_error, error_response};
use crate::runtime::budget::BudgetLedger;
use crate::state::AppState;

pub const AGENT_HEADER: &str = "x-torbo-agent-id";
pub const PLATFORM_HEADER: &str = "x-torbo-platform";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response types (OpenAI shape)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct CompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<CompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

#[derive(Debug, Serialize)]
struct CompletionChoice {
    index: u32,
    message: CompletionMessage,
    finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
struct CompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChunkResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
struct ChunkChoice {
    index: u32,
    delta: ChunkDelta,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/completions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    let stream = body.stream;
    let turn = match prepare_turn(&state, &headers, body).await {
        Ok(turn) => turn,
        Err(response) => return response,
    };

    if stream {
        chat_stream(state, turn).await
    } else {
        chat_blocking(state, turn).await
    }
}

/// Everything resolved before dispatch.
struct PreparedTurn {
    agent_id: String,
    model: String,
    handle: ProviderHandle,
    provider_body: ProviderRequest,
    user_text: String,
    prompt_text: String,
}

/// Steps 1–7 of the resolution order: agent, access level, budget, model,
/// enrichment, redaction.
async fn prepare_turn(
    state: &AppState,
    headers: &HeaderMap,
    mut body: ChatCompletionRequest,
) -> Result<PreparedTurn, Response> {
    // ── Resolve agent ────────────────────────────────────────────────
    let agent_id = headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(tb_agents::builtin::DEFAULT_AGENT_ID)
        .to_string();
    let agent = state
        .agents
        .get(&agent_id)
        .ok_or_else(|| error_response(Error::AgentNotFound(agent_id.clone())))?;

    // ── Access level & tool gating ───────────────────────────────────
    let effective_level = agent.access_level.min(state.config.access.level);
    let before = body.tools.len();
    body.tools
        .retain(|tool| state.skills.required_level(&tool.function.name) <= effective_level);
    if body.tools.len() < before {
        tracing::debug!(
            agent_id = %agent.id,
            dropped = before - body.tools.len(),
            effective_level,
            "dropped tools above effective access level"
        );
    }

    // ── Budget preflight ─────────────────────────────────────────────
    if let Err(exceeded) = state.ledger.check(&agent) {
        if agent.hard_stop_on_budget {
            return Err(error_response(Error::BudgetExceeded {
                window: exceeded.window.as_str().to_string(),
                used: exceeded.used,
                limit: exceeded.limit,
            }));
        }
        tracing::warn!(
            agent_id = %agent.id,
            window = exceeded.window.as_str(),
            used = exceeded.used,
            limit = exceeded.limit,
            "budget exceeded, proceeding (hard stop disabled)"
        );
    }

    // ── Model selection ──────────────────────────────────────────────
    let model = if !body.model.is_empty() && body.model != DEFAULT_MODEL_SENTINEL {
        body.model.clone()
    } else if !agent.preferred_model.is_empty() {
        agent.preferred_model.clone()
    } else {
        state.config.llm.default_model.clone()
    };
    let handle = state
        .providers
        .resolve_for_model(&model)
        .map_err(error_response)?
        .clone();
    if !handle.available() {
        return Err(error_response(Error::Provider {
            provider: handle.id().to_string(),
            message: "provider has no API key configured".into(),
        }));
    }

    // ── Enrich ───────────────────────────────────────────────────────
    let client_provided_system = body.messages.iter().any(|m| m.is_system());
    let user_text = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.extract_all_text())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "no user message found in messages array",
            )
        })?;

    let tail: Vec<String> = body
        .messages
        .iter()
        .filter(|m| !m.is_system())
        .map(|m| m.content.extract_all_text())
        .collect();

    let memories_block = match retrieve_block(
        &state.memory_index,
        &user_text,
        &tail,
        state.config.weaver.memory_top_k,
        state.config.weaver.memory_min_score,
    )
    .await
    {
        Ok(block) => block,
        Err(e) => {
            tracing::warn!(error = %e, "memory retrieval failed, continuing without");
            None
        }
    };

    let skills_block = {
        let available = state.skills.available_for(
            effective_level,
            &agent.enabled_skills,
            |category| agent.capability_enabled(category),
        );
        if available.is_empty() {
            None
        } else {
            let lines: Vec<String> = available.iter().map(|s| s.render_line()).collect();
            Some(format!("Available skills:\n{}", lines.join("\n")))
        }
    };

    let commitments_block = state.commitments.as_ref().and_then(|source| {
        let pending = source.pending();
        if pending.is_empty() {
            None
        } else {
            Some(format!(
                "Pending commitments:\n{}",
                pending
                    .iter()
                    .map(|c| format!("- {c}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))
        }
    });

    let debate_block = match &state.debate {
        Some(synthesizer)
            if state.config.weaver.debate_enabled
                && decision_confidence(&user_text) >= state.config.weaver.debate_threshold =>
        {
            match synthesizer.synthesize(&user_text).await {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(error = %e, "debate synthesis failed, continuing without");
                    None
                }
            }
        }
        _ => None,
    };

    let platform = headers
        .get(PLATFORM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let block = assemble(&WeaveInput {
        agent: &agent,
        client_provided_system,
        access_level: effective_level,
        platform: platform.as_deref(),
        memories_block,
        structured_block: state.structured.render_block(),
        skills_block,
        commitments_block,
        debate_block,
        budget_tokens: state.config.weaver.system_budget_tokens,
    });
    merge_into_messages(&mut body.messages, &block);

    let prompt_text: String = body
        .messages
        .iter()
        .map(|m| m.content.extract_all_text())
        .collect::<Vec<_>>()
        .join("\n");

    // ── Build native body & redact ───────────────────────────────────
    let mut provider_body = build_provider_request(handle.kind(), &body, &model, body.stream);
    if handle.is_remote() {
        state
            .privacy
            .filter_request(&mut provider_body, state.config.privacy.level);
    }

    Ok(PreparedTurn {
        agent_id: agent.id,
        model,
        handle,
        provider_body,
        user_text,
        prompt_text,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn chat_blocking(state: AppState, turn: PreparedTurn) -> Response {
    let outcome = match state
        .dispatcher
        .chat(&turn.handle, &turn.provider_body, &turn.model)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };

    // Users never see placeholders.
    let text = state.privacy.restore(&outcome.text);

    let usage = outcome
        .usage
        .unwrap_or_else(|| Usage::estimate(&turn.prompt_text, &text));
    state
        .ledger
        .record(&turn.agent_id, usage.total_tokens as u64);

    state.jobs.enqueue(MemoryJob::Extract {
        user_text: turn.user_text,
        assistant_text: text.clone(),
        model: turn.model.clone(),
    });

    let response = CompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: turn.model,
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage {
                role: "assistant",
                content: text,
            },
            finish_reason: "stop",
        }],
        usage: Some(usage),
    };
    Json(response).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the SSE generator needs after the handler returns.
struct StreamContext {
    completion_id: String,
    created: i64,
    model: String,
    agent_id: String,
    user_text: String,
    prompt_text: String,
    privacy: Arc<PrivacyFilter>,
    ledger: Arc<BudgetLedger>,
    jobs: JobQueue,
}

async fn chat_stream(state: AppState, turn: PreparedTurn) -> Response {
    let events = match state
        .dispatcher
        .chat_stream(&turn.handle, &turn.provider_body, &turn.model)
        .await
    {
        Ok(events) => events,
        Err(e) => return error_response(e),
    };

    let ctx = StreamContext {
        completion_id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        created: chrono::Utc::now().timestamp(),
        model: turn.model,
        agent_id: turn.agent_id,
        user_text: turn.user_text,
        prompt_text: turn.prompt_text,
        privacy: state.privacy.clone(),
        ledger: state.ledger.clone(),
        jobs: state.jobs.clone(),
    };

    Sse::new(make_client_stream(events, ctx))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Wrap the backend event stream as OpenAI chunks for the client.
///
/// Chunk order is backend order. Accounting and the Librarian enqueue
/// happen only after the backend reports `Done`; a client disconnect drops
/// this generator (cancelling the backend stream with it) before that
/// point, so a cancelled exchange is never extracted.
fn make_client_stream(
    mut events: BoxStream<'static, tb_domain::error::Result<StreamEvent>>,
    ctx: StreamContext,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        // Initial chunk carries the assistant role.
        yield Ok(chunk_event(&ctx, ChunkDelta {
            role: Some("assistant"),
            content: None,
        }, None));

        let mut assistant_text = String::new();
        let mut finished = false;
        let mut usage: Option<Usage> = None;

        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::Token { text }) => {
                    let restored = ctx.privacy.restore(&text);
                    assistant_text.push_str(&restored);
                    yield Ok(chunk_event(&ctx, ChunkDelta {
                        role: None,
                        content: Some(restored),
                    }, None));
                }
                Ok(StreamEvent::Done { usage: reported, .. }) => {
                    usage = reported;
                    finished = true;
                    break;
                }
                Ok(StreamEvent::Error { message }) => {
                    tracing::warn!(message = %message, "backend stream error");
                    yield Ok(Event::default().data(
                        serde_json::json!({
                            "error": { "message": message }
                        })
                        .to_string(),
                    ));
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "backend stream failed");
                    yield Ok(Event::default().data(
                        serde_json::json!({
                            "error": { "message": e.to_string() }
                        })
                        .to_string(),
                    ));
                    break;
                }
            }
        }

        if finished {
            let usage = usage
                .unwrap_or_else(|| Usage::estimate(&ctx.prompt_text, &assistant_text));
            ctx.ledger.record(&ctx.agent_id, usage.total_tokens as u64);
            ctx.jobs.enqueue(MemoryJob::Extract {
                user_text: ctx.user_text.clone(),
                assistant_text,
                model: ctx.model.clone(),
            });

            yield Ok(chunk_event(&ctx, ChunkDelta {
                role: None,
                content: None,
            }, Some("stop")));
        }

        yield Ok(Event::default().data("[DONE]"));
    }
}

fn chunk_event(
    ctx: &StreamContext,
    delta: ChunkDelta,
    finish_reason: Option<&'static str>,
) -> Event {
    let chunk = ChunkResponse {
        id: ctx.completion_id.clone(),
        object: "chat.completion.chunk",
        created: ctx.created,
        model: ctx.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };
    match serde_json::to_string(&chunk) {
        Ok(data) => Event::default().data(data),
        Err(e) => Event::default().data(
            serde_json::json!({ "error": { "message": e.to_string() } }).to_string(),
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx(jobs: JobQueue) -> StreamContext {
        StreamContext {
            completion_id: "chatcmpl-test".into(),
            created: 0,
            model: "test-model".into(),
            agent_id: "torbo".into(),
            user_text: "hi".into(),
            prompt_text: "hi".into(),
            privacy: Arc::new(PrivacyFilter::new()),
            ledger: Arc::new(BudgetLedger::new()),
            jobs,
        }
    }

    fn scripted_events(
        events: Vec<tb_domain::error::Result<StreamEvent>>,
    ) -> BoxStream<'static, tb_domain::error::Result<StreamEvent>> {
        Box::pin(futures_util::stream::iter(events))
    }

    #[tokio::test]
    async fn completed_stream_enqueues_librarian_job_and_accounts() {
        let (queue, mut rx) = JobQueue::new(4);
        let ctx = test_ctx(queue);
        let ledger = ctx.ledger.clone();

        let events = scripted_events(vec![
            Ok(StreamEvent::Token { text: "Hel".into() }),
            Ok(StreamEvent::Token { text: "lo".into() }),
            Ok(StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 2,
                    total_tokens: 12,
                }),
                finish_reason: Some("stop".into()),
            }),
        ]);

        let chunks: Vec<_> = make_client_stream(events, ctx).collect().await;
        // role chunk + 2 tokens + stop chunk + [DONE]
        assert_eq!(chunks.len(), 5);

        match rx.try_recv() {
            Ok(MemoryJob::Extract {
                user_text,
                assistant_text,
                ..
            }) => {
                assert_eq!(user_text, "hi");
                assert_eq!(assistant_text, "Hello");
            }
            Err(_) => panic!("expected a librarian job"),
        }
        assert_eq!(ledger.status("torbo").day_tokens, 12);
    }

    #[tokio::test]
    async fn dropped_stream_skips_librarian_and_accounting() {
        let (queue, mut rx) = JobQueue::new(4);
        let ctx = test_ctx(queue);
        let ledger = ctx.ledger.clone();

        // A backend stream that never completes after the first token.
        let events: BoxStream<'static, tb_domain::error::Result<StreamEvent>> =
            Box::pin(async_stream::stream! {
                yield Ok(StreamEvent::Token { text: "partial".into() });
                futures_util::future::pending::<()>().await;
            });

        let stream = make_client_stream(events, ctx);
        futures_util::pin_mut!(stream);
        // Client reads the role chunk and one token, then disconnects.
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        drop(stream);

        assert!(rx.try_recv().is_err(), "no librarian job after cancel");
        assert_eq!(ledger.status("torbo").day_tokens, 0);
    }

    #[tokio::test]
    async fn backend_error_surfaces_and_skips_enqueue() {
        let (queue, mut rx) = JobQueue::new(4);
        let ctx = test_ctx(queue);

        let events = scripted_events(vec![
            Ok(StreamEvent::Token { text: "a".into() }),
            Ok(StreamEvent::Error {
                message: "backend fell over".into(),
            }),
        ]);

        let chunks: Vec<_> = make_client_stream(events, ctx).collect().await;
        let last_payloads: Vec<String> = chunks
            .iter()
            .map(|c| format!("{c:?}"))
            .collect();
        assert!(last_payloads.iter().any(|p| p.contains("backend fell over")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn restored_text_flows_to_client_and_librarian() {
        let (queue, mut rx) = JobQueue::new(4);
        let ctx = test_ctx(queue);
        // Seed the redaction map so the placeholder has an inverse.
        ctx.privacy
            .redact_text("mail a@b.com", tb_domain::config::PrivacyLevel::Standard);

        let events = scripted_events(vec![
            Ok(StreamEvent::Token {
                text: "Wrote to [EMAIL_REDACTED]_0".into(),
            }),
            Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            }),
        ]);

        let chunks: Vec<_> = make_client_stream(events, ctx).collect().await;
        let rendered: Vec<String> = chunks.iter().map(|c| format!("{c:?}")).collect();
        assert!(rendered.iter().any(|p| p.contains("a@b.com")));
        assert!(!rendered.iter().any(|p| p.contains("EMAIL_REDACTED")));

        match rx.try_recv() {
            Ok(MemoryJob::Extract { assistant_text, .. }) => {
                assert_eq!(assistant_text, "Wrote to a@b.com");
            }
            Err(_) => panic!("expected a librarian job"),
        }
    }
}
