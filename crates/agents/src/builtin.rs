//! Shipped built-in agents and the field-level upgrade policy.
//!
//! On startup every built-in agent on disk is compared field-by-field
//! against the table of previously-shipped values. A field is refreshed to
//! the latest default only when its stored value matches a known previous
//! default; anything else is a user customization and is preserved.

use chrono::Utc;

use crate::agent::Agent;

/// Id of the default built-in agent. The registry always contains it.
pub const DEFAULT_AGENT_ID: &str = "torbo";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shipped defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const NAME: &str = "Torbo";
const PRONOUNS: &str = "they/them";
const ROLE: &str = "general-purpose local assistant";
const VOICE_TONE: &str =
    "Warm and direct. Plain language, short sentences, no filler.";
const CORE_VALUES: &str =
    "Privacy first. Be honest about uncertainty. Prefer local resources over cloud.";
const TOPICS_TO_AVOID: &str = "";
const CUSTOM_INSTRUCTIONS: &str = "";
const BACKGROUND_KNOWLEDGE: &str = "";

/// One upgradeable identity field: its latest shipped default plus every
/// default shipped before it.
struct ShippedField {
    latest: &'static str,
    previous: &'static [&'static str],
    get: fn(&Agent) -> &str,
    set: fn(&mut Agent, String),
}

const SHIPPED_FIELDS: &[ShippedField] = &[
    ShippedField {
        latest: NAME,
        previous: &["torbo"],
        get: |a| &a.name,
        set: |a, v| a.name = v,
    },
    ShippedField {
        latest: PRONOUNS,
        previous: &["it/its"],
        get: |a| &a.pronouns,
        set: |a, v| a.pronouns = v,
    },
    ShippedField {
        latest: ROLE,
        previous: &["local assistant", "personal assistant"],
        get: |a| &a.role,
        set: |a, v| a.role = v,
    },
    ShippedField {
        latest: VOICE_TONE,
        previous: &[
            "Friendly and helpful.",
            "Warm, direct, and concise. No filler.",
        ],
        get: |a| &a.voice_tone,
        set: |a, v| a.voice_tone = v,
    },
    ShippedField {
        latest: CORE_VALUES,
        previous: &["Privacy first. Honest about uncertainty."],
        get: |a| &a.core_values,
        set: |a, v| a.core_values = v,
    },
    ShippedField {
        latest: TOPICS_TO_AVOID,
        previous: &[],
        get: |a| &a.topics_to_avoid,
        set: |a, v| a.topics_to_avoid = v,
    },
    ShippedField {
        latest: CUSTOM_INSTRUCTIONS,
        previous: &[],
        get: |a| &a.custom_instructions,
        set: |a, v| a.custom_instructions = v,
    },
    ShippedField {
        latest: BACKGROUND_KNOWLEDGE,
        previous: &[],
        get: |a| &a.background_knowledge,
        set: |a, v| a.background_knowledge = v,
    },
];

/// Build the shipped default agent record.
pub fn default_agent() -> Agent {
    let now = Utc::now();
    Agent {
        id: DEFAULT_AGENT_ID.into(),
        name: NAME.into(),
        pronouns: PRONOUNS.into(),
        role: ROLE.into(),
        voice_tone: VOICE_TONE.into(),
        core_values: CORE_VALUES.into(),
        topics_to_avoid: TOPICS_TO_AVOID.into(),
        custom_instructions: CUSTOM_INSTRUCTIONS.into(),
        background_knowledge: BACKGROUND_KNOWLEDGE.into(),
        preferred_model: String::new(),
        access_level: 5,
        allowed_paths: Vec::new(),
        enabled_skills: Vec::new(),
        capabilities: Default::default(),
        daily_token_limit: 0,
        weekly_token_limit: 0,
        monthly_token_limit: 0,
        hard_stop_on_budget: false,
        is_built_in: true,
        created_at: now,
        last_modified_at: now,
    }
}

/// Apply the upgrade policy to a built-in agent loaded from disk.
///
/// Returns `true` when any field was refreshed (the caller persists).
pub fn refresh_shipped_fields(agent: &mut Agent) -> bool {
    let mut changed = false;
    for field in SHIPPED_FIELDS {
        let stored = (field.get)(agent);
        if stored != field.latest && field.previous.contains(&stored) {
            (field.set)(agent, field.latest.to_string());
            changed = true;
        }
    }
    if changed {
        agent.last_modified_at = Utc::now();
    }
    changed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_default_is_refreshed() {
        let mut agent = default_agent();
        agent.voice_tone = "Friendly and helpful.".into();
        assert!(refresh_shipped_fields(&mut agent));
        assert_eq!(agent.voice_tone, VOICE_TONE);
    }

    #[test]
    fn customization_is_preserved() {
        let mut agent = default_agent();
        agent.voice_tone = "Talk like a pirate.".into();
        agent.custom_instructions = "always end with arrr".into();
        refresh_shipped_fields(&mut agent);
        assert_eq!(agent.voice_tone, "Talk like a pirate.");
        assert_eq!(agent.custom_instructions, "always end with arrr");
    }

    #[test]
    fn latest_default_is_a_noop() {
        let mut agent = default_agent();
        assert!(!refresh_shipped_fields(&mut agent));
    }
}
