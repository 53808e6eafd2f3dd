use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Global default model when neither the request nor the agent picks
    /// one. Format: a bare model name the prefix table can resolve.
    #[serde(default = "d_default_model")]
    pub default_model: String,
    /// Retry cap for transient backend failures (network, 5xx, 429).
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Registered backends (data-driven: adding a provider = adding config).
    #[serde(default = "d_providers")]
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: d_default_model(),
            max_retries: d_max_retries(),
            providers: d_providers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key. `None` for the local
    /// backend.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model-id prefixes routed to this backend (e.g. `["claude-"]`).
    /// A request model matching no prefix falls through to the local
    /// backend.
    #[serde(default)]
    pub model_prefixes: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Per-provider dispatch timeout.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local inference daemon speaking the OpenAI shape. Never redacted.
    Local,
    OpenaiCompat,
    Anthropic,
    Google,
}

impl ProviderKind {
    /// Remote providers get the privacy filter applied before dispatch.
    pub fn is_remote(&self) -> bool {
        !matches!(self, ProviderKind::Local)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_model() -> String {
    "qwen2.5:14b".into()
}
fn d_max_retries() -> u32 {
    3
}
fn d_timeout_secs() -> u64 {
    120
}
fn d_providers() -> Vec<ProviderConfig> {
    vec![ProviderConfig {
        id: "local".into(),
        kind: ProviderKind::Local,
        base_url: "http://127.0.0.1:11434".into(),
        api_key_env: None,
        model_prefixes: Vec::new(),
        default_model: None,
        timeout_secs: d_timeout_secs(),
    }]
}
