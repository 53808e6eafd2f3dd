//! Per-provider response parsing: SSE data payloads → stream events, and
//! blocking response bodies → (text, usage).

use serde_json::Value;

use tb_domain::error::{Error, Result};
use tb_domain::stream::{StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one OpenAI streaming data payload.
pub fn parse_openai_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        })];
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Http(format!("bad SSE payload: {e}")))],
    };

    let mut events = Vec::new();
    if let Some(text) = value["choices"][0]["delta"]["content"].as_str() {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }
    if let Some(usage) = parse_openai_usage(&value["usage"]) {
        events.push(Ok(StreamEvent::Done {
            usage: Some(usage),
            finish_reason: value["choices"][0]["finish_reason"]
                .as_str()
                .map(String::from),
        }));
    }
    events
}

/// Parse a blocking OpenAI chat-completion response.
pub fn parse_openai_response(value: &Value) -> Result<(String, Option<Usage>)> {
    let text = value["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    Ok((text, parse_openai_usage(&value["usage"])))
}

fn parse_openai_usage(value: &Value) -> Option<Usage> {
    let prompt = value["prompt_tokens"].as_u64()?;
    let completion = value["completion_tokens"].as_u64().unwrap_or(0);
    Some(Usage {
        prompt_tokens: prompt as u32,
        completion_tokens: completion as u32,
        total_tokens: value["total_tokens"]
            .as_u64()
            .unwrap_or(prompt + completion) as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anthropic shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable state carried across Anthropic stream events: input tokens
/// arrive on `message_start`, output tokens on `message_delta`.
#[derive(Default)]
pub struct AnthropicStreamState {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicStreamState {
    /// Parse one Anthropic streaming data payload.
    pub fn parse_data(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        let value: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Http(format!("bad SSE payload: {e}")))],
        };

        match value["type"].as_str() {
            Some("message_start") => {
                if let Some(tokens) = value["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = tokens as u32;
                }
                vec![]
            }
            Some("content_block_delta") => {
                match value["delta"]["text"].as_str() {
                    Some(text) if !text.is_empty() => vec![Ok(StreamEvent::Token {
                        text: text.to_string(),
                    })],
                    _ => vec![],
                }
            }
            Some("message_delta") => {
                if let Some(tokens) = value["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = tokens as u32;
                }
                vec![]
            }
            Some("message_stop") => {
                let usage = Usage {
                    prompt_tokens: self.input_tokens,
                    completion_tokens: self.output_tokens,
                    total_tokens: self.input_tokens + self.output_tokens,
                };
                vec![Ok(StreamEvent::Done {
                    usage: Some(usage),
                    finish_reason: Some("stop".into()),
                })]
            }
            Some("error") => {
                let message = value["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                vec![Ok(StreamEvent::Error { message })]
            }
            // ping, content_block_start/stop
            _ => vec![],
        }
    }
}

/// Parse a blocking Anthropic messages response.
pub fn parse_anthropic_response(value: &Value) -> Result<(String, Option<Usage>)> {
    let text = value["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = value["usage"]["input_tokens"].as_u64().map(|input| {
        let output = value["usage"]["output_tokens"].as_u64().unwrap_or(0);
        Usage {
            prompt_tokens: input as u32,
            completion_tokens: output as u32,
            total_tokens: (input + output) as u32,
        }
    });

    Ok((text, usage))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gemini shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one Gemini streaming data payload (`alt=sse` chunks carry the
/// same shape as the blocking response).
pub fn parse_gemini_data(data: &str) -> Vec<Result<StreamEvent>> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Http(format!("bad SSE payload: {e}")))],
    };

    let mut events = Vec::new();
    if let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::Token {
                        text: text.to_string(),
                    }));
                }
            }
        }
    }

    // The final chunk carries usageMetadata and a finishReason.
    if value["candidates"][0]["finishReason"].as_str().is_some() {
        events.push(Ok(StreamEvent::Done {
            usage: parse_gemini_usage(&value["usageMetadata"]),
            finish_reason: Some("stop".into()),
        }));
    }
    events
}

/// Parse a blocking Gemini generateContent response.
pub fn parse_gemini_response(value: &Value) -> Result<(String, Option<Usage>)> {
    let text = value["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    Ok((text, parse_gemini_usage(&value["usageMetadata"])))
}

fn parse_gemini_usage(value: &Value) -> Option<Usage> {
    let prompt = value["promptTokenCount"].as_u64()?;
    let completion = value["candidatesTokenCount"].as_u64().unwrap_or(0);
    Some(Usage {
        prompt_tokens: prompt as u32,
        completion_tokens: completion as u32,
        total_tokens: value["totalTokenCount"].as_u64().unwrap_or(prompt + completion) as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(events: &[Result<StreamEvent>]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::Token { text }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn openai_delta_and_done() {
        let events =
            parse_openai_data(r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#);
        assert_eq!(texts(&events), vec!["Hel"]);

        let done = parse_openai_data("[DONE]");
        assert!(matches!(done[0], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn openai_blocking_response() {
        let value: Value = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}],
                "usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#,
        )
        .unwrap();
        let (text, usage) = parse_openai_response(&value).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn anthropic_stream_assembles_usage() {
        let mut state = AnthropicStreamState::default();
        state.parse_data(r#"{"type":"message_start","message":{"usage":{"input_tokens":7}}}"#);
        let tokens = state
            .parse_data(r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#);
        assert_eq!(texts(&tokens), vec!["Hi"]);
        state.parse_data(r#"{"type":"message_delta","usage":{"output_tokens":3}}"#);
        let done = state.parse_data(r#"{"type":"message_stop"}"#);

        match &done[0] {
            Ok(StreamEvent::Done { usage: Some(u), .. }) => {
                assert_eq!(u.prompt_tokens, 7);
                assert_eq!(u.completion_tokens, 3);
            }
            other => panic!("expected done with usage, got {other:?}"),
        }
    }

    #[test]
    fn gemini_chunk_with_finish_reason() {
        let events = parse_gemini_data(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1,"totalTokenCount":6}}"#,
        );
        assert_eq!(texts(&events), vec!["Hello"]);
        assert!(matches!(
            events.last(),
            Some(Ok(StreamEvent::Done { usage: Some(_), .. }))
        ));
    }

    #[test]
    fn anthropic_blocking_response() {
        let value: Value = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hel"},{"type":"text","text":"lo"}],
                "usage":{"input_tokens":4,"output_tokens":2}}"#,
        )
        .unwrap();
        let (text, usage) = parse_anthropic_response(&value).unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(usage.unwrap().total_tokens, 6);
    }
}
