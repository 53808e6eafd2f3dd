use serde::{Deserialize, Serialize};

/// A skill definition loaded from one `<id>.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Capability category the skill belongs to (e.g. `calendar`, `web`).
    /// Agents can toggle whole categories off.
    #[serde(default = "d_category")]
    pub category: String,
    /// Minimum effective access level (0–5) required to use the skill.
    #[serde(default)]
    pub min_access_level: u8,
    /// Tool names this skill contributes to the request tool list.
    #[serde(default)]
    pub tools: Vec<String>,
}

fn d_category() -> String {
    "general".into()
}

impl SkillEntry {
    /// One line of the skills block injected into the system prompt.
    pub fn render_line(&self) -> String {
        format!("- {}: {}", self.name, self.description)
    }
}
