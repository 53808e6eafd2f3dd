//! Platform context notes.
//!
//! A short, platform-specific instruction about formatting conventions,
//! keyed by the `x-torbo-platform` header tag. Unknown tags get no note.

pub fn platform_note(tag: &str) -> Option<&'static str> {
    let note = match tag {
        "webchat" => {
            "You are replying in the web chat. Full Markdown is supported, \
             including code blocks and tables."
        }
        "slack" => {
            "You are replying in Slack. Use Slack mrkdwn (*bold*, _italic_, \
             `code`); no tables. Keep replies short."
        }
        "telegram" => {
            "You are replying in Telegram. Basic Markdown only; prefer short \
             paragraphs over lists."
        }
        "discord" => {
            "You are replying in Discord. Standard Markdown works; keep \
             messages under 2000 characters."
        }
        "signal" | "whatsapp" | "sms" | "imessage" => {
            "You are replying in a plain-text messenger. No Markdown, no \
             formatting, keep it brief and conversational."
        }
        "matrix" => {
            "You are replying in Matrix. Markdown is rendered; keep replies \
             compact."
        }
        "email" => {
            "You are replying by email. Plain text, complete sentences, a \
             greeting and sign-off when appropriate."
        }
        _ => return None,
    };
    Some(note)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_have_notes() {
        for tag in [
            "webchat", "slack", "telegram", "discord", "signal", "whatsapp", "matrix",
            "email", "sms", "imessage",
        ] {
            assert!(platform_note(tag).is_some(), "missing note for {tag}");
        }
    }

    #[test]
    fn unknown_tag_has_none() {
        assert!(platform_note("carrier-pigeon").is_none());
    }
}
