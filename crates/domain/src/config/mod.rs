mod llm;
mod memory;
mod paths;
mod privacy;
mod server;
mod weaver;

pub use llm::*;
pub use memory::*;
pub use paths::*;
pub use privacy::*;
pub use server::*;
pub use weaver::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub weaver: WeaverConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Access control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Global access level 0–5. The effective level for a request is
    /// `min(agent.access_level, access.level)`.
    #[serde(default = "d_access_level")]
    pub level: u8,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            level: d_access_level(),
        }
    }
}

fn d_access_level() -> u8 {
    5
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the loaded configuration. The server refuses to start when
    /// any issue has `Error` severity.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.access.level > 5 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "access.level".into(),
                message: format!("must be 0–5, got {}", self.access.level),
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for provider in &self.llm.providers {
            if !seen.insert(provider.id.as_str()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "llm.providers".into(),
                    message: format!("duplicate provider id '{}'", provider.id),
                });
            }
            if provider.base_url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers.{}.base_url", provider.id),
                    message: "must not be empty".into(),
                });
            }
        }

        if !self
            .llm
            .providers
            .iter()
            .any(|p| p.kind == ProviderKind::Local)
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no local backend configured — memory extraction and \
                          default routing will be unavailable"
                    .into(),
            });
        }

        if self.weaver.system_budget_tokens == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "weaver.system_budget_tokens".into(),
                message: "budget of 0 drops every optional prompt section".into(),
            });
        }

        if self.memory.workers == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "memory.workers".into(),
                message: "0 workers — clamped to 1 at startup".into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn duplicate_provider_id_is_an_error() {
        let mut config = Config::default();
        config.llm.providers = vec![
            ProviderConfig {
                id: "a".into(),
                kind: ProviderKind::Local,
                base_url: "http://localhost:11434".into(),
                api_key_env: None,
                model_prefixes: vec![],
                default_model: None,
                timeout_secs: 120,
            },
            ProviderConfig {
                id: "a".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                api_key_env: Some("ANTHROPIC_API_KEY".into()),
                model_prefixes: vec!["claude-".into()],
                default_model: None,
                timeout_secs: 120,
            },
        ];
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn minimal_toml_parses() {
        let raw = r#"
            [server]
            port = 4000

            [[llm.providers]]
            id = "local"
            kind = "local"
            base_url = "http://127.0.0.1:11434"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.llm.providers.len(), 1);
        assert_eq!(config.privacy.level, PrivacyLevel::Standard);
    }
}
