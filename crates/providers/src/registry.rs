//! Provider registry.
//!
//! Built once at startup from `[llm.providers]`. Resolves API keys from
//! the environment (a remote provider with a missing key is registered but
//! marked unavailable) and answers the model → backend question through
//! the model-prefix table, falling back to the local backend.

use tb_domain::config::{LlmConfig, ProviderConfig, ProviderKind};
use tb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderHandle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One configured backend with its resolved credentials.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    pub config: ProviderConfig,
    /// Resolved API key; `None` for the local backend or when the env var
    /// is unset.
    pub api_key: Option<String>,
}

impl ProviderHandle {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    pub fn is_remote(&self) -> bool {
        self.config.kind.is_remote()
    }

    /// A remote provider without a key cannot be dispatched to.
    pub fn available(&self) -> bool {
        !self.is_remote() || self.api_key.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    providers: Vec<ProviderHandle>,
}

impl ProviderRegistry {
    pub fn from_config(llm: &LlmConfig) -> Result<Self> {
        let mut providers = Vec::new();
        for config in &llm.providers {
            let api_key = match &config.api_key_env {
                Some(env_var) => match std::env::var(env_var) {
                    Ok(key) if !key.is_empty() => Some(key),
                    _ => {
                        tracing::warn!(
                            provider = %config.id,
                            env_var = %env_var,
                            "API key env var unset — provider registered but unavailable"
                        );
                        None
                    }
                },
                None => None,
            };
            providers.push(ProviderHandle {
                config: config.clone(),
                api_key,
            });
        }

        if providers.is_empty() {
            return Err(Error::Config("no providers configured".into()));
        }
        tracing::info!(providers = providers.len(), "provider registry ready");
        Ok(Self { providers })
    }

    /// Build directly from handles (tests).
    pub fn new(providers: Vec<ProviderHandle>) -> Self {
        Self { providers }
    }

    pub fn list(&self) -> &[ProviderHandle] {
        &self.providers
    }

    pub fn get(&self, id: &str) -> Option<&ProviderHandle> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// The local backend, when configured.
    pub fn local(&self) -> Option<&ProviderHandle> {
        self.providers
            .iter()
            .find(|p| p.kind() == ProviderKind::Local)
    }

    /// Resolve the backend for a model id: first provider whose prefix
    /// table matches, otherwise the local backend, otherwise the first
    /// configured provider.
    pub fn resolve_for_model(&self, model: &str) -> Result<&ProviderHandle> {
        let matched = self.providers.iter().find(|p| {
            p.config
                .model_prefixes
                .iter()
                .any(|prefix| model.starts_with(prefix.as_str()))
        });
        matched
            .or_else(|| self.local())
            .or_else(|| self.providers.first())
            .ok_or_else(|| Error::Config("no providers configured".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str, kind: ProviderKind, prefixes: &[&str]) -> ProviderHandle {
        ProviderHandle {
            config: ProviderConfig {
                id: id.into(),
                kind,
                base_url: "http://example".into(),
                api_key_env: None,
                model_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
                default_model: None,
                timeout_secs: 30,
            },
            api_key: if kind.is_remote() {
                Some("key".into())
            } else {
                None
            },
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(vec![
            handle("local", ProviderKind::Local, &[]),
            handle("anthropic", ProviderKind::Anthropic, &["claude-"]),
            handle("google", ProviderKind::Google, &["gemini-"]),
            handle("openai", ProviderKind::OpenaiCompat, &["gpt-", "o4"]),
        ])
    }

    #[test]
    fn prefix_table_routes_models() {
        let registry = registry();
        assert_eq!(
            registry.resolve_for_model("claude-sonnet-4").unwrap().id(),
            "anthropic"
        );
        assert_eq!(
            registry.resolve_for_model("gemini-2.0-flash").unwrap().id(),
            "google"
        );
        assert_eq!(registry.resolve_for_model("gpt-4o").unwrap().id(), "openai");
    }

    #[test]
    fn unmatched_model_falls_through_to_local() {
        let registry = registry();
        assert_eq!(
            registry.resolve_for_model("qwen2.5:14b").unwrap().id(),
            "local"
        );
    }

    #[test]
    fn remote_without_key_is_unavailable() {
        let mut h = handle("anthropic", ProviderKind::Anthropic, &["claude-"]);
        h.api_key = None;
        assert!(!h.available());
        assert!(handle("local", ProviderKind::Local, &[]).available());
    }
}
