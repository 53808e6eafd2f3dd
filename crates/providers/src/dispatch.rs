//! Backend dispatch with retry.
//!
//! One `Dispatcher` owns the HTTP client. Transient failures (connect
//! errors, 5xx, 429) are retried with exponential backoff up to the
//! configured cap; any other 4xx is surfaced as a permanent upstream error
//! with a sanitized message. Streaming responses hand the `reqwest`
//! response to the shared SSE machinery with a provider-specific parser.

use std::time::Duration;

use serde_json::Value;

use tb_domain::chat::ProviderRequest;
use tb_domain::config::ProviderKind;
use tb_domain::error::{Error, Result};
use tb_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::parse;
use crate::registry::ProviderHandle;
use crate::sse::sse_response_stream;

const BACKOFF_BASE_MS: u64 = 200;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Result of a blocking chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub usage: Option<Usage>,
}

pub struct Dispatcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl Dispatcher {
    pub fn new(max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    // ── Public API ───────────────────────────────────────────────────

    /// Send a blocking (non-streaming) chat request.
    pub async fn chat(
        &self,
        handle: &ProviderHandle,
        request: &ProviderRequest,
        model: &str,
    ) -> Result<ChatOutcome> {
        let response = self
            .send_with_retries(handle, request, model, false)
            .await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let (text, usage) = match handle.kind() {
            ProviderKind::Local | ProviderKind::OpenaiCompat => {
                parse::parse_openai_response(&value)?
            }
            ProviderKind::Anthropic => parse::parse_anthropic_response(&value)?,
            ProviderKind::Google => parse::parse_gemini_response(&value)?,
        };
        Ok(ChatOutcome { text, usage })
    }

    /// Send a streaming chat request and return the parsed event stream.
    /// Dropping the stream cancels the in-flight backend request.
    pub async fn chat_stream(
        &self,
        handle: &ProviderHandle,
        request: &ProviderRequest,
        model: &str,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.send_with_retries(handle, request, model, true).await?;

        let stream = match handle.kind() {
            ProviderKind::Local | ProviderKind::OpenaiCompat => {
                sse_response_stream(response, parse::parse_openai_data)
            }
            ProviderKind::Anthropic => {
                let mut state = parse::AnthropicStreamState::default();
                sse_response_stream(response, move |data| state.parse_data(data))
            }
            ProviderKind::Google => sse_response_stream(response, parse::parse_gemini_data),
        };
        Ok(stream)
    }

    // ── Private ──────────────────────────────────────────────────────

    fn endpoint(&self, handle: &ProviderHandle, model: &str, stream: bool) -> String {
        let base = handle.config.base_url.trim_end_matches('/');
        match handle.kind() {
            ProviderKind::Local | ProviderKind::OpenaiCompat => {
                format!("{base}/v1/chat/completions")
            }
            ProviderKind::Anthropic => format!("{base}/v1/messages"),
            ProviderKind::Google => {
                let method = if stream {
                    "streamGenerateContent?alt=sse&key="
                } else {
                    "generateContent?key="
                };
                format!(
                    "{base}/v1beta/models/{model}:{method}{key}",
                    key = handle.api_key.as_deref().unwrap_or_default()
                )
            }
        }
    }

    fn build_request(
        &self,
        handle: &ProviderHandle,
        body: &ProviderRequest,
        model: &str,
        stream: bool,
    ) -> Result<reqwest::RequestBuilder> {
        if !handle.available() {
            return Err(Error::Provider {
                provider: handle.id().to_string(),
                message: "provider has no API key configured".into(),
            });
        }

        let url = self.endpoint(handle, model, stream);
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);

        match handle.kind() {
            ProviderKind::OpenaiCompat => {
                if let Some(key) = &handle.api_key {
                    builder = builder.bearer_auth(key);
                }
            }
            ProviderKind::Anthropic => {
                builder = builder
                    .header("x-api-key", handle.api_key.as_deref().unwrap_or_default())
                    .header("anthropic-version", ANTHROPIC_VERSION);
            }
            // Key rides in the query string; local takes no auth.
            ProviderKind::Google | ProviderKind::Local => {}
        }

        if !stream {
            builder = builder.timeout(Duration::from_secs(handle.config.timeout_secs));
        }
        Ok(builder)
    }

    /// Send with up to `max_retries` extra attempts on transient failures.
    async fn send_with_retries(
        &self,
        handle: &ProviderHandle,
        body: &ProviderRequest,
        model: &str,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let mut last_error = Error::Provider {
            provider: handle.id().to_string(),
            message: "no attempts made".into(),
        };

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
                tokio::time::sleep(backoff).await;
                tracing::debug!(
                    provider = handle.id(),
                    attempt,
                    "retrying backend request"
                );
            }

            let builder = self.build_request(handle, body, model, stream)?;
            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let retriable =
                        status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    let message = sanitize_upstream_message(
                        &response.text().await.unwrap_or_default(),
                    );
                    if retriable {
                        tracing::warn!(
                            provider = handle.id(),
                            status = status.as_u16(),
                            "transient backend error"
                        );
                        last_error = Error::Provider {
                            provider: handle.id().to_string(),
                            message: format!("HTTP {status}: {message}"),
                        };
                        continue;
                    }
                    // Permanent 4xx: surface upstream status verbatim.
                    return Err(Error::Upstream {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) if e.is_timeout() => {
                    last_error = Error::Timeout(format!(
                        "provider '{}' timed out after {}s",
                        handle.id(),
                        handle.config.timeout_secs
                    ));
                }
                Err(e) => {
                    last_error = Error::Http(e.to_string());
                }
            }
        }

        Err(last_error)
    }
}

/// Strip newlines and clamp upstream error text so backend bodies never
/// flood a client response or a log line.
fn sanitize_upstream_message(body: &str) -> String {
    let flat: String = body
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let trimmed = flat.trim();
    if trimmed.len() > 200 {
        let mut end = 200;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
