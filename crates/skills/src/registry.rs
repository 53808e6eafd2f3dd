//! In-memory skills registry, loaded once from `skills/*.toml`.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use tb_domain::error::{Error, Result};

use crate::types::SkillEntry;

pub struct SkillsRegistry {
    entries: RwLock<Vec<SkillEntry>>,
    skills_root: PathBuf,
}

impl SkillsRegistry {
    /// Scan `skills_root` for `*.toml` skill definitions. A file that fails
    /// to parse is skipped with a warning.
    pub fn load(skills_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(skills_root)?;

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(skills_root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| {
                    toml::from_str::<SkillEntry>(&raw).map_err(|e| Error::Config(e.to_string()))
                }) {
                Ok(skill) => entries.push(skill),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable skill file");
                }
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));

        tracing::info!(
            skills_count = entries.len(),
            path = %skills_root.display(),
            "skills registry loaded"
        );
        Ok(Self {
            entries: RwLock::new(entries),
            skills_root: skills_root.to_path_buf(),
        })
    }

    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            skills_root: PathBuf::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.skills_root
    }

    pub fn list(&self) -> Vec<SkillEntry> {
        self.entries.read().clone()
    }

    /// Skills usable at `level` for an agent described by its enabled-skill
    /// list (empty = all) and its capability toggles.
    pub fn available_for(
        &self,
        level: u8,
        enabled_skills: &[String],
        capability_enabled: impl Fn(&str) -> bool,
    ) -> Vec<SkillEntry> {
        self.entries
            .read()
            .iter()
            .filter(|s| s.min_access_level <= level)
            .filter(|s| enabled_skills.is_empty() || enabled_skills.iter().any(|id| id == &s.id))
            .filter(|s| capability_enabled(&s.category))
            .cloned()
            .collect()
    }

    /// Access level a request-listed tool requires. Unknown tools default
    /// to 0 (no gate).
    pub fn required_level(&self, tool_name: &str) -> u8 {
        self.entries
            .read()
            .iter()
            .filter(|s| s.tools.iter().any(|t| t == tool_name))
            .map(|s| s.min_access_level)
            .max()
            .unwrap_or(0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(dir: &Path) {
        std::fs::write(
            dir.join("web-search.toml"),
            r#"
id = "web-search"
name = "Web Search"
description = "Search the web"
category = "web"
min_access_level = 2
tools = ["web.search"]
"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("shell.toml"),
            r#"
id = "shell"
name = "Shell"
description = "Run commands"
category = "system"
min_access_level = 5
tools = ["shell.exec"]
"#,
        )
        .unwrap();
    }

    #[test]
    fn loads_and_filters_by_level() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let registry = SkillsRegistry::load(dir.path()).unwrap();

        assert_eq!(registry.list().len(), 2);
        let at_level_3 = registry.available_for(3, &[], |_| true);
        assert_eq!(at_level_3.len(), 1);
        assert_eq!(at_level_3[0].id, "web-search");
    }

    #[test]
    fn agent_skill_list_and_category_toggles_apply() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let registry = SkillsRegistry::load(dir.path()).unwrap();

        let only_shell = vec!["shell".to_string()];
        let skills = registry.available_for(5, &only_shell, |_| true);
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].id, "shell");

        let no_web = registry.available_for(5, &[], |category| category != "web");
        assert!(no_web.iter().all(|s| s.category != "web"));
    }

    #[test]
    fn tool_level_lookup() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let registry = SkillsRegistry::load(dir.path()).unwrap();

        assert_eq!(registry.required_level("shell.exec"), 5);
        assert_eq!(registry.required_level("web.search"), 2);
        assert_eq!(registry.required_level("unknown.tool"), 0);
    }

    #[test]
    fn bad_toml_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        let registry = SkillsRegistry::load(dir.path()).unwrap();
        assert_eq!(registry.list().len(), 2);
    }
}
