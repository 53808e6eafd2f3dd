use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use tb_domain::error::{Error, Result};

/// Agent ids are lowercase slugs.
pub const AGENT_ID_PATTERN: &str = "^[a-z0-9_-]+$";

static AGENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(AGENT_ID_PATTERN).expect("agent id pattern compiles"));

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named personality plus its permission set and preferences. One JSON
/// file per agent on disk (`agents/<id>.json`, camelCase keys).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub pronouns: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub voice_tone: String,
    #[serde(default)]
    pub core_values: String,
    #[serde(default)]
    pub topics_to_avoid: String,
    #[serde(default)]
    pub custom_instructions: String,
    #[serde(default)]
    pub background_knowledge: String,
    /// Empty = defer to the caller / global default.
    #[serde(default)]
    pub preferred_model: String,
    /// 0–5; the effective level for a request is min(this, global).
    #[serde(default = "d_access_level")]
    pub access_level: u8,
    /// Absolute directory scopes; empty = unrestricted within the global
    /// sandbox.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    /// Skill ids this agent may use; empty = all.
    #[serde(default)]
    pub enabled_skills: Vec<String>,
    /// Per-category capability toggles; an absent category is enabled.
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    /// 0 = unlimited.
    #[serde(default)]
    pub daily_token_limit: u64,
    #[serde(default)]
    pub weekly_token_limit: u64,
    #[serde(default)]
    pub monthly_token_limit: u64,
    /// When true, a hit budget fails the request instead of logging.
    #[serde(default)]
    pub hard_stop_on_budget: bool,
    #[serde(default)]
    pub is_built_in: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

fn d_access_level() -> u8 {
    3
}

impl Agent {
    /// A blank user agent with the given id/name, stamped now.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            pronouns: String::new(),
            role: String::new(),
            voice_tone: String::new(),
            core_values: String::new(),
            topics_to_avoid: String::new(),
            custom_instructions: String::new(),
            background_knowledge: String::new(),
            preferred_model: String::new(),
            access_level: d_access_level(),
            allowed_paths: Vec::new(),
            enabled_skills: Vec::new(),
            capabilities: HashMap::new(),
            daily_token_limit: 0,
            weekly_token_limit: 0,
            monthly_token_limit: 0,
            hard_stop_on_budget: false,
            is_built_in: false,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// Validate the id against the slug pattern.
    pub fn validate_id(id: &str) -> Result<()> {
        if AGENT_ID_RE.is_match(id) {
            Ok(())
        } else {
            Err(Error::InvalidAgentId(id.to_string()))
        }
    }

    /// Whether a capability category is enabled (absent = enabled).
    pub fn capability_enabled(&self, category: &str) -> bool {
        self.capabilities.get(category).copied().unwrap_or(true)
    }

    /// Whether this agent may use the given skill (empty list = all).
    pub fn skill_allowed(&self, skill_id: &str) -> bool {
        self.enabled_skills.is_empty() || self.enabled_skills.iter().any(|s| s == skill_id)
    }

    /// Revert personality fields to a neutral template, preserving
    /// id / name / role and everything non-personality.
    pub fn reset_personality(&mut self) {
        self.pronouns = String::new();
        self.voice_tone = "Neutral, helpful, and concise.".into();
        self.core_values = String::new();
        self.topics_to_avoid = String::new();
        self.custom_instructions = String::new();
        self.background_knowledge = String::new();
        self.last_modified_at = Utc::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert!(Agent::validate_id("torbo").is_ok());
        assert!(Agent::validate_id("my-agent_2").is_ok());
        assert!(Agent::validate_id("Bad").is_err());
        assert!(Agent::validate_id("has space").is_err());
        assert!(Agent::validate_id("").is_err());
        assert!(Agent::validate_id("emoji🦀").is_err());
    }

    #[test]
    fn camel_case_on_disk() {
        let agent = Agent::new("t", "T");
        let value = serde_json::to_value(&agent).unwrap();
        assert!(value.get("voiceTone").is_some());
        assert!(value.get("hardStopOnBudget").is_some());
        assert!(value.get("isBuiltIn").is_some());
        assert!(value.get("dailyTokenLimit").is_some());
    }

    #[test]
    fn absent_capability_is_enabled() {
        let mut agent = Agent::new("t", "T");
        assert!(agent.capability_enabled("calendar"));
        agent.capabilities.insert("calendar".into(), false);
        assert!(!agent.capability_enabled("calendar"));
    }

    #[test]
    fn empty_skill_list_allows_all() {
        let mut agent = Agent::new("t", "T");
        assert!(agent.skill_allowed("anything"));
        agent.enabled_skills.push("web-search".into());
        assert!(agent.skill_allowed("web-search"));
        assert!(!agent.skill_allowed("calendar"));
    }

    #[test]
    fn reset_preserves_identity_and_limits() {
        let mut agent = Agent::new("helper", "Helper");
        agent.role = "research assistant".into();
        agent.custom_instructions = "always cite sources".into();
        agent.daily_token_limit = 5000;

        agent.reset_personality();

        assert_eq!(agent.id, "helper");
        assert_eq!(agent.role, "research assistant");
        assert!(agent.custom_instructions.is_empty());
        assert_eq!(agent.daily_token_limit, 5000);
    }
}
