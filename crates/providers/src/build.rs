//! Translate the enriched OpenAI-shape request into a provider's native
//! body.
//!
//! By the time a request reaches this module the weaver has already merged
//! the assembled system block into the message list; here it is only
//! reshaped. Anthropic wants system content in a top-level `system` field
//! and block-list message content; Gemini wants `contents[].parts[]` with
//! `model` in place of `assistant` plus a `systemInstruction`.

use tb_domain::chat::{
    AnthropicBlock, AnthropicBody, AnthropicMessage, ChatCompletionRequest, GeminiBody,
    GeminiContent, GeminiGenerationConfig, GeminiPart, OpenAiBody, ProviderRequest,
};
use tb_domain::config::ProviderKind;

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Build the native request body for `kind`, using `model` as the resolved
/// model id and `stream` for the transport mode.
pub fn build_provider_request(
    kind: ProviderKind,
    request: &ChatCompletionRequest,
    model: &str,
    stream: bool,
) -> ProviderRequest {
    match kind {
        ProviderKind::Local | ProviderKind::OpenaiCompat => {
            ProviderRequest::OpenAi(build_openai(request, model, stream))
        }
        ProviderKind::Anthropic => {
            ProviderRequest::Anthropic(build_anthropic(request, model, stream))
        }
        ProviderKind::Google => ProviderRequest::Gemini(build_gemini(request)),
    }
}

fn build_openai(request: &ChatCompletionRequest, model: &str, stream: bool) -> OpenAiBody {
    OpenAiBody {
        model: model.to_string(),
        messages: request.messages.clone(),
        system: None,
        stream,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        tools: request.tools.clone(),
    }
}

fn build_anthropic(request: &ChatCompletionRequest, model: &str, stream: bool) -> AnthropicBody {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<AnthropicMessage> = Vec::new();

    for message in &request.messages {
        let text = message.content.extract_all_text();
        match message.role.as_str() {
            "system" => system_parts.push(text),
            role => messages.push(AnthropicMessage {
                role: if role == "assistant" {
                    "assistant".into()
                } else {
                    "user".into()
                },
                content: vec![AnthropicBlock::Text { text }],
            }),
        }
    }

    AnthropicBody {
        model: model.to_string(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        stream,
        temperature: request.temperature,
    }
}

fn build_gemini(request: &ChatCompletionRequest) -> GeminiBody {
    let mut system_parts: Vec<GeminiPart> = Vec::new();
    let mut contents: Vec<GeminiContent> = Vec::new();

    for message in &request.messages {
        let text = message.content.extract_all_text();
        match message.role.as_str() {
            "system" => system_parts.push(GeminiPart::Text { text }),
            role => contents.push(GeminiContent {
                role: Some(if role == "assistant" {
                    "model".into()
                } else {
                    "user".into()
                }),
                parts: vec![GeminiPart::Text { text }],
            }),
        }
    }

    GeminiBody {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        },
        generation_config: Some(GeminiGenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tb_domain::chat::{ChatMessage, MessageContent};

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "_default".into(),
            messages: vec![
                ChatMessage::system("be helpful"),
                ChatMessage {
                    role: "user".into(),
                    content: MessageContent::Text("hi".into()),
                },
                ChatMessage {
                    role: "assistant".into(),
                    content: MessageContent::Text("hello".into()),
                },
            ],
            stream: false,
            temperature: Some(0.7),
            max_tokens: Some(256),
            tools: vec![],
        }
    }

    #[test]
    fn anthropic_hoists_system_to_top_level() {
        let body = build_anthropic(&request(), "claude-sonnet-4", true);
        assert_eq!(body.system.as_deref(), Some("be helpful"));
        assert_eq!(body.messages.len(), 2);
        assert!(body.stream);
        assert_eq!(body.max_tokens, 256);
    }

    #[test]
    fn gemini_maps_assistant_to_model_role() {
        let body = build_gemini(&request());
        assert!(body.system_instruction.is_some());
        assert_eq!(body.contents.len(), 2);
        assert_eq!(body.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn openai_passes_messages_through() {
        let body = build_openai(&request(), "gpt-4o", false);
        assert_eq!(body.model, "gpt-4o");
        assert_eq!(body.messages.len(), 3);
    }
}
