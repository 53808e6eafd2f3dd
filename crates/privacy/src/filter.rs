//! Session-scoped redaction engine.
//!
//! The redaction map lives for one gateway session: each distinct original
//! string gets exactly one placeholder, and the map is the inverse used by
//! [`PrivacyFilter::restore`]. Matches inside a string are replaced
//! right-to-left so byte offsets stay valid during replacement.

use std::collections::HashMap;

use parking_lot::Mutex;

use tb_domain::chat::{
    AnthropicBlock, AnthropicBody, GeminiBody, GeminiPart, MessageContent, OpenAiBody,
    ProviderRequest,
};
use tb_domain::config::PrivacyLevel;

use crate::patterns::{patterns_for, PatternKind};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redaction map
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct RedactionMap {
    /// original substring → placeholder token (a bijection within the
    /// session).
    by_original: HashMap<String, String>,
    counter: u64,
}

impl RedactionMap {
    /// Placeholder for `original`, assigning a fresh one on first sight.
    fn placeholder_for(&mut self, original: &str, kind: PatternKind) -> String {
        if let Some(existing) = self.by_original.get(original) {
            return existing.clone();
        }
        let placeholder = format!("[{}_REDACTED]_{}", kind.label(), self.counter);
        self.counter += 1;
        self.by_original
            .insert(original.to_string(), placeholder.clone());
        placeholder
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PrivacyFilter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pattern-based reversible redaction, provider-shape aware.
#[derive(Default)]
pub struct PrivacyFilter {
    map: Mutex<RedactionMap>,
}

impl PrivacyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Text-level primitives ────────────────────────────────────────

    /// Redact every enabled pattern in `text`, right-to-left per pattern.
    pub fn redact_text(&self, text: &str, level: PrivacyLevel) -> String {
        if level == PrivacyLevel::Off {
            return text.to_string();
        }

        let mut result = text.to_string();
        let mut map = self.map.lock();

        for (kind, regex) in patterns_for(level) {
            let ranges: Vec<(usize, usize)> = regex
                .find_iter(&result)
                .map(|m| (m.start(), m.end()))
                .collect();
            // Replace right-to-left so earlier byte offsets stay valid.
            for (start, end) in ranges.into_iter().rev() {
                let original = result[start..end].to_string();
                let placeholder = map.placeholder_for(&original, kind);
                result.replace_range(start..end, &placeholder);
            }
        }

        result
    }

    /// Substitute placeholders back to their originals, longest
    /// placeholder first so `..._10` is never clobbered by `..._1`.
    pub fn restore(&self, text: &str) -> String {
        let map = self.map.lock();
        if map.by_original.is_empty() {
            return text.to_string();
        }

        let mut pairs: Vec<(&String, &String)> = map.by_original.iter().collect();
        pairs.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.1.cmp(b.1)));

        let mut result = text.to_string();
        for (original, placeholder) in pairs {
            if result.contains(placeholder.as_str()) {
                result = result.replace(placeholder.as_str(), original);
            }
        }
        result
    }

    /// Drop the session redaction map.
    pub fn clear_map(&self) {
        *self.map.lock() = RedactionMap::default();
    }

    /// Number of distinct originals currently mapped.
    pub fn map_len(&self) -> usize {
        self.map.lock().by_original.len()
    }

    // ── Shape-aware walkers ──────────────────────────────────────────

    /// Dispatch on the provider body variant.
    pub fn filter_request(&self, request: &mut ProviderRequest, level: PrivacyLevel) {
        match request {
            ProviderRequest::OpenAi(body) => self.filter_openai(body, level),
            ProviderRequest::Anthropic(body) => self.filter_anthropic(body, level),
            ProviderRequest::Gemini(body) => self.filter_gemini(body, level),
        }
    }

    /// Walk `messages[].content` (string or block list) plus the top-level
    /// `system` string.
    pub fn filter_openai(&self, body: &mut OpenAiBody, level: PrivacyLevel) {
        for message in &mut body.messages {
            self.filter_message_content(&mut message.content, level);
        }
        if let Some(system) = &mut body.system {
            *system = self.redact_text(system, level);
        }
    }

    /// Walk every block's `text` and `tool_result` content, plus `system`.
    pub fn filter_anthropic(&self, body: &mut AnthropicBody, level: PrivacyLevel) {
        for message in &mut body.messages {
            for block in &mut message.content {
                match block {
                    AnthropicBlock::Text { text } => {
                        *text = self.redact_text(text, level);
                    }
                    AnthropicBlock::ToolResult { content, .. } => {
                        *content = self.redact_text(content, level);
                    }
                }
            }
        }
        if let Some(system) = &mut body.system {
            *system = self.redact_text(system, level);
        }
    }

    /// Walk `contents[].parts[]` (text and `functionResponse.response.result`)
    /// plus `systemInstruction.parts[]`.
    pub fn filter_gemini(&self, body: &mut GeminiBody, level: PrivacyLevel) {
        for content in &mut body.contents {
            for part in &mut content.parts {
                self.filter_gemini_part(part, level);
            }
        }
        if let Some(instruction) = &mut body.system_instruction {
            for part in &mut instruction.parts {
                self.filter_gemini_part(part, level);
            }
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    fn filter_message_content(&self, content: &mut MessageContent, level: PrivacyLevel) {
        match content {
            MessageContent::Text(text) => {
                *text = self.redact_text(text, level);
            }
            MessageContent::Parts(parts) => {
                for part in parts {
                    if let tb_domain::chat::ContentPart::Text { text } = part {
                        *text = self.redact_text(text, level);
                    }
                }
            }
        }
    }

    fn filter_gemini_part(&self, part: &mut GeminiPart, level: PrivacyLevel) {
        match part {
            GeminiPart::Text { text } => {
                *text = self.redact_text(text, level);
            }
            GeminiPart::FunctionResponse { function_response } => {
                function_response.response.result =
                    self.redact_text(&function_response.response.result, level);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
